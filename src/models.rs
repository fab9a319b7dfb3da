use serde::Serialize;

/// The fixed set of categories an entry can carry. `Income` is the only
/// earning category; everything else counts as expenditure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Income,
    FoodAndDrinks,
    Shopping,
    Housing,
    Transportation,
    Vehicle,
    Entertainment,
    Investments,
    Other,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Income,
        Category::FoodAndDrinks,
        Category::Shopping,
        Category::Housing,
        Category::Transportation,
        Category::Vehicle,
        Category::Entertainment,
        Category::Investments,
        Category::Other,
    ];

    /// Display name, also the value stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Income => "Income",
            Category::FoodAndDrinks => "Food & Drinks",
            Category::Shopping => "Shopping",
            Category::Housing => "Housing",
            Category::Transportation => "Transportation",
            Category::Vehicle => "Vehicle",
            Category::Entertainment => "Entertainment",
            Category::Investments => "Investments",
            Category::Other => "Other",
        }
    }

    pub fn parse(value: &str) -> Option<Category> {
        let value = value.trim();
        Category::ALL.into_iter().find(|c| c.as_str() == value)
    }

    pub fn is_income(self) -> bool {
        matches!(self, Category::Income)
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Expense {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub category: String,
    pub amount_cents: i64,
    pub spent_on: String,
    pub spent_at: String,
    pub note: Option<String>,
}

/// Validated input for creating or fully replacing an expense.
#[derive(Debug, Clone)]
pub struct ExpenseInput {
    pub name: String,
    pub category: Category,
    pub amount_cents: i64,
    pub spent_on: String,
    pub spent_at: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct CategoryTotal {
    pub category: Category,
    pub total_cents: i64,
}
