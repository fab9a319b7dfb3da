#[macro_use]
extern crate rocket;

mod auth;
mod config;
mod db;
mod models;
mod oauth;

use chrono::{Duration, Local, Utc};
use rocket::figment::Figment;
use rocket::form::Form;
use rocket::fs::FileServer;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::Redirect;
use rocket::serde::Serialize;
use rocket::{Build, Rocket, State};
use rocket_dyn_templates::Template;
use rusqlite::Connection;
use uuid::Uuid;

use auth::{AuthError, Credentials, RegisterError};
use config::AppConfig;
use db::DbPool;
use models::{Category, CategoryTotal, Expense, ExpenseInput, User};

const MAX_SESSIONS: i64 = 5;
const SESSION_COOKIE: &str = "session";
const MIN_PASSWORD_LEN: usize = 6;

const PIE_COLORS: [&str; 8] = [
    "#b91d47", "#00aba9", "#2b5797", "#e8c3b9", "#1e7145", "#FF8911", "#E8C872", "#D63484",
];

#[derive(FromForm)]
struct LoginForm {
    email: String,
    password: String,
}

#[derive(FromForm)]
struct RegisterForm {
    email: String,
    password: String,
}

#[derive(FromForm)]
struct ExpenseForm {
    name: String,
    category: String,
    amount: String,
    date: String,
    time: String,
    note: Option<String>,
}

#[derive(Responder)]
enum PageError {
    Redirect(Redirect),
    Status(Status),
}

#[derive(Serialize)]
struct ExpenseView {
    id: i64,
    name: String,
    category: String,
    amount: String,
    date: String,
    time: String,
    note: Option<String>,
}

#[derive(Serialize)]
struct CategoryTotalView {
    category: &'static str,
    total: String,
}

fn format_money(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.abs();
    let whole = abs / 100;
    let frac = abs % 100;
    format!("{sign}{whole}.{frac:02}")
}

fn parse_amount_to_cents(input: &str) -> Option<i64> {
    let mut s = input.trim().to_string();
    if s.is_empty() {
        return None;
    }
    if s.starts_with('-') {
        return None;
    }
    s = s.replace(',', ".");
    let mut parts = s.split('.');
    let whole_str = parts.next()?;
    let frac_str = parts.next();
    if parts.next().is_some() {
        return None;
    }
    let whole: i64 = whole_str.parse().ok()?;
    let frac = match frac_str {
        None => 0,
        Some(frac) => {
            if frac.len() > 2 {
                return None;
            }
            let mut padded = frac.to_string();
            while padded.len() < 2 {
                padded.push('0');
            }
            padded.parse::<i64>().ok()?
        }
    };
    Some(whole * 100 + frac)
}

fn today_ymd() -> String {
    Local::now().date_naive().format("%Y-%m-%d").to_string()
}

fn today_dmy() -> String {
    Local::now().date_naive().format("%d/%m/%Y").to_string()
}

fn now_hm() -> String {
    Local::now().format("%H:%M").to_string()
}

/// 12-hour rendering of a stored "HH:MM" value. Hour 0 maps to 12 AM
/// and hour 12 to 12 PM; anything unparseable passes through as-is.
fn format_time_12h(value: &str) -> String {
    let mut parts = value.splitn(2, ':');
    let (Some(hour), Some(minute)) = (parts.next(), parts.next()) else {
        return value.to_string();
    };
    let Ok(hour) = hour.parse::<u32>() else {
        return value.to_string();
    };
    if hour > 23 {
        return value.to_string();
    }
    let suffix = if hour >= 12 { "PM" } else { "AM" };
    let hour = match hour % 12 {
        0 => 12,
        hour => hour,
    };
    format!("{hour}:{minute} {suffix}")
}

fn require_user(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Result<User, Redirect> {
    let conn = pool.get().map_err(|_| Redirect::to("/login"))?;
    if let Some(cookie) = cookies.get(SESSION_COOKIE) {
        let now = Utc::now().to_rfc3339();
        if let Ok(Some(user)) = db::user_by_session(&conn, cookie.value(), &now) {
            return Ok(user);
        }
    }
    Err(Redirect::to("/login"))
}

fn current_user(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Option<User> {
    let conn = pool.get().ok()?;
    let token = cookies.get(SESSION_COOKIE)?.value().to_string();
    let now = Utc::now().to_rfc3339();
    db::user_by_session(&conn, &token, &now).ok().flatten()
}

fn start_session(
    conn: &Connection,
    cookies: &CookieJar<'_>,
    user_id: i64,
    ttl_minutes: i64,
) -> rusqlite::Result<()> {
    let token = Uuid::new_v4().to_string();
    let now = Utc::now();
    let expires_at = now + Duration::minutes(ttl_minutes);
    db::delete_expired_sessions(conn, &now.to_rfc3339())?;
    db::create_session(
        conn,
        user_id,
        &token,
        &now.to_rfc3339(),
        &expires_at.to_rfc3339(),
    )?;
    db::prune_sessions(conn, user_id, MAX_SESSIONS)?;

    let mut cookie = Cookie::new(SESSION_COOKIE, token);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookies.add(cookie);
    Ok(())
}

fn render_login(error: Option<&str>) -> Template {
    Template::render(
        "login",
        serde_json::json!({
            "error": error,
        }),
    )
}

fn render_register(error: Option<&str>) -> Template {
    Template::render(
        "register",
        serde_json::json!({
            "error": error,
        }),
    )
}

#[get("/")]
fn home(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Result<Template, Redirect> {
    if current_user(pool, cookies).is_some() {
        return Err(Redirect::to("/expense"));
    }
    Ok(Template::render("home", serde_json::json!({})))
}

#[get("/login")]
fn login(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Result<Template, Redirect> {
    if current_user(pool, cookies).is_some() {
        return Err(Redirect::to("/expense"));
    }
    Ok(render_login(None))
}

#[post("/login", data = "<form>")]
fn login_post(
    pool: &State<DbPool>,
    cookies: &CookieJar<'_>,
    settings: &State<AppConfig>,
    form: Form<LoginForm>,
) -> Result<Redirect, Template> {
    let conn = pool
        .get()
        .map_err(|_| render_login(Some("The database is unavailable, try again later")))?;
    let form = form.into_inner();
    let email = form.email.trim();
    if email.is_empty() || form.password.is_empty() {
        return Err(render_login(Some("Enter an email and password")));
    }

    let user = match auth::authenticate(
        &conn,
        Credentials::Local {
            email: email.to_string(),
            password: form.password,
        },
    ) {
        Ok(user) => user,
        Err(AuthError::UserNotFound | AuthError::InvalidCredentials) => {
            return Err(render_login(Some("Incorrect email or password")));
        }
        Err(err) => {
            log::error!("login failed for {email}: {err}");
            return Err(render_login(Some("Something went wrong, try again later")));
        }
    };

    start_session(&conn, cookies, user.id, settings.session_ttl_minutes).map_err(|err| {
        log::error!("failed to create session for user {}: {err}", user.id);
        render_login(Some("Something went wrong, try again later"))
    })?;
    Ok(Redirect::to("/expense"))
}

#[get("/register")]
fn register(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Result<Template, Redirect> {
    if current_user(pool, cookies).is_some() {
        return Err(Redirect::to("/expense"));
    }
    Ok(render_register(None))
}

#[post("/register", data = "<form>")]
fn register_post(
    pool: &State<DbPool>,
    cookies: &CookieJar<'_>,
    settings: &State<AppConfig>,
    form: Form<RegisterForm>,
) -> Result<Redirect, Template> {
    let conn = pool
        .get()
        .map_err(|_| render_register(Some("The database is unavailable, try again later")))?;
    let form = form.into_inner();
    let email = form.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(render_register(Some("Enter a valid email address")));
    }
    if form.password.len() < MIN_PASSWORD_LEN {
        return Err(render_register(Some(
            "The password must be at least 6 characters",
        )));
    }

    let user = match auth::register(&conn, email, &form.password) {
        Ok(user) => user,
        Err(RegisterError::EmailTaken) => {
            return Err(render_register(Some(
                "An account with that email already exists",
            )));
        }
        Err(err) => {
            log::error!("registration failed for {email}: {err}");
            return Err(render_register(Some("Something went wrong, try again later")));
        }
    };

    start_session(&conn, cookies, user.id, settings.session_ttl_minutes).map_err(|err| {
        log::error!("failed to create session for user {}: {err}", user.id);
        render_register(Some("Something went wrong, try again later"))
    })?;
    Ok(Redirect::to("/expense"))
}

#[get("/auth/google")]
fn google_login(settings: &State<AppConfig>) -> Redirect {
    match &settings.google {
        Some(google) => Redirect::to(oauth::authorize_url(google)),
        None => {
            log::warn!("federated login requested but no provider is configured");
            Redirect::to("/login")
        }
    }
}

#[get("/auth/google/callback?<code>&<error>")]
async fn google_callback(
    pool: &State<DbPool>,
    cookies: &CookieJar<'_>,
    settings: &State<AppConfig>,
    http: &State<reqwest::Client>,
    code: Option<String>,
    error: Option<String>,
) -> Redirect {
    let Some(google) = &settings.google else {
        return Redirect::to("/login");
    };
    if let Some(error) = error {
        log::warn!("federated login denied by provider: {error}");
        return Redirect::to("/login");
    }
    let Some(code) = code else {
        return Redirect::to("/login");
    };

    let assertion = match oauth::exchange_code(google, http, &code).await {
        Ok(assertion) => assertion,
        Err(err) => {
            log::error!("federated login failed: {err}");
            return Redirect::to("/login");
        }
    };
    log::info!("federated login for subject {}", assertion.subject);

    let Ok(conn) = pool.get() else {
        return Redirect::to("/login");
    };
    let user = match auth::authenticate(&conn, Credentials::Federated(assertion)) {
        Ok(user) => user,
        Err(err) => {
            log::error!("federated sign-in failed: {err}");
            return Redirect::to("/login");
        }
    };
    if let Err(err) = start_session(&conn, cookies, user.id, settings.session_ttl_minutes) {
        log::error!("failed to create session for user {}: {err}", user.id);
        return Redirect::to("/login");
    }
    Redirect::to("/expense")
}

#[get("/logout")]
fn logout(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Redirect {
    if let Some(cookie) = cookies.get(SESSION_COOKIE) {
        if let Ok(conn) = pool.get() {
            let _ = db::delete_session(&conn, cookie.value());
        }
    }
    cookies.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Redirect::to("/")
}

#[get("/expense")]
fn expenses(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Result<Template, Redirect> {
    let user = require_user(pool, cookies)?;
    let conn = pool.get().map_err(|_| Redirect::to("/login"))?;

    let records = db::list_expenses(&conn, user.id).unwrap_or_default();
    let totals = db::category_totals(&conn, user.id).unwrap_or_default();
    let (income_cents, expenditure_cents) =
        db::income_vs_expenditure(&conn, user.id).unwrap_or((0, 0));

    let views = records.into_iter().map(expense_view).collect::<Vec<_>>();
    let chart_labels = totals
        .iter()
        .filter(|t| !t.category.is_income())
        .map(|t| t.category.as_str())
        .collect::<Vec<_>>();
    let chart_values = totals
        .iter()
        .filter(|t| !t.category.is_income())
        .map(|t| t.total_cents as f64 / 100.0)
        .collect::<Vec<_>>();
    let total_views = totals
        .into_iter()
        .map(category_total_view)
        .collect::<Vec<_>>();

    let context = serde_json::json!({
        "email": user.email,
        "current_date": today_dmy(),
        "current_time": format_time_12h(&now_hm()),
        "today": today_ymd(),
        "expenses": views,
        "totals": total_views,
        "income": format_money(income_cents),
        "expenditure": format_money(expenditure_cents),
        "categories": Category::ALL.map(|c| c.as_str()),
        "chart_labels": chart_labels,
        "chart_values": chart_values,
        "pie_colors": PIE_COLORS,
        "bar_values": [income_cents as f64 / 100.0, expenditure_cents as f64 / 100.0],
    });
    Ok(Template::render("expenses", &context))
}

#[post("/expense", data = "<form>")]
fn create_expense(
    pool: &State<DbPool>,
    cookies: &CookieJar<'_>,
    form: Form<ExpenseForm>,
) -> Result<Redirect, Status> {
    let user = match require_user(pool, cookies) {
        Ok(user) => user,
        Err(redirect) => return Ok(redirect),
    };
    let input = parse_expense_form(form.into_inner())?;
    let conn = pool.get().map_err(|_| Status::InternalServerError)?;
    db::insert_expense(&conn, user.id, &input).map_err(|err| {
        log::error!("failed to create expense for user {}: {err}", user.id);
        Status::InternalServerError
    })?;
    Ok(Redirect::to("/expense"))
}

#[get("/expense/<id>/edit")]
fn edit_expense(
    pool: &State<DbPool>,
    cookies: &CookieJar<'_>,
    id: i64,
) -> Result<Template, PageError> {
    let user = require_user(pool, cookies).map_err(PageError::Redirect)?;
    let conn = pool
        .get()
        .map_err(|_| PageError::Status(Status::InternalServerError))?;
    let record = db::expense_by_id(&conn, user.id, id)
        .map_err(|_| PageError::Status(Status::InternalServerError))?;
    let Some(record) = record else {
        return Err(PageError::Status(Status::NotFound));
    };

    let context = serde_json::json!({
        "email": user.email,
        "expense": edit_view(record),
        "categories": Category::ALL.map(|c| c.as_str()),
    });
    Ok(Template::render("edit_expense", &context))
}

#[post("/expense/<id>/edit", data = "<form>")]
fn update_expense(
    pool: &State<DbPool>,
    cookies: &CookieJar<'_>,
    id: i64,
    form: Form<ExpenseForm>,
) -> Result<Redirect, Status> {
    let user = match require_user(pool, cookies) {
        Ok(user) => user,
        Err(redirect) => return Ok(redirect),
    };
    let input = parse_expense_form(form.into_inner())?;
    let conn = pool.get().map_err(|_| Status::InternalServerError)?;
    let updated = db::update_expense(&conn, user.id, id, &input).map_err(|err| {
        log::error!("failed to update expense {id}: {err}");
        Status::InternalServerError
    })?;
    if !updated {
        return Err(Status::NotFound);
    }
    Ok(Redirect::to("/expense"))
}

#[post("/expense/<id>/delete")]
fn delete_expense(
    pool: &State<DbPool>,
    cookies: &CookieJar<'_>,
    id: i64,
) -> Result<Redirect, Status> {
    let user = match require_user(pool, cookies) {
        Ok(user) => user,
        Err(redirect) => return Ok(redirect),
    };
    let conn = pool.get().map_err(|_| Status::InternalServerError)?;
    let deleted = db::delete_expense(&conn, user.id, id).map_err(|err| {
        log::error!("failed to delete expense {id}: {err}");
        Status::InternalServerError
    })?;
    if !deleted {
        return Err(Status::NotFound);
    }
    Ok(Redirect::to("/expense"))
}

fn parse_expense_form(form: ExpenseForm) -> Result<ExpenseInput, Status> {
    let name = form.name.trim();
    if name.is_empty() {
        return Err(Status::BadRequest);
    }
    let category = Category::parse(&form.category).ok_or(Status::BadRequest)?;
    let amount_cents = parse_amount_to_cents(&form.amount).ok_or(Status::BadRequest)?;
    let spent_on = if form.date.trim().is_empty() {
        today_ymd()
    } else {
        form.date.trim().to_string()
    };
    let spent_at = if form.time.trim().is_empty() {
        now_hm()
    } else {
        form.time.trim().to_string()
    };
    let note = form
        .note
        .map(|note| note.trim().to_string())
        .filter(|note| !note.is_empty());

    Ok(ExpenseInput {
        name: name.to_string(),
        category,
        amount_cents,
        spent_on,
        spent_at,
        note,
    })
}

fn expense_view(record: Expense) -> ExpenseView {
    ExpenseView {
        id: record.id,
        name: record.name,
        category: record.category,
        amount: format_money(record.amount_cents),
        date: record.spent_on,
        time: format_time_12h(&record.spent_at),
        note: record.note,
    }
}

/// The edit form wants raw stored values: 24-hour time for the time
/// input and a bare decimal for the number input.
fn edit_view(record: Expense) -> ExpenseView {
    ExpenseView {
        id: record.id,
        name: record.name,
        category: record.category,
        amount: format_money(record.amount_cents),
        date: record.spent_on,
        time: record.spent_at,
        note: record.note,
    }
}

fn category_total_view(total: CategoryTotal) -> CategoryTotalView {
    CategoryTotalView {
        category: total.category.as_str(),
        total: format_money(total.total_cents),
    }
}

fn build(figment: Figment) -> Rocket<Build> {
    let settings = AppConfig::from_figment(&figment);
    if let Some(dir) = settings.db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).expect("create data directory");
    }
    let pool = db::init_db(&settings.db_path);

    rocket::custom(figment)
        .manage(pool)
        .manage(settings)
        .manage(reqwest::Client::new())
        .mount(
            "/",
            routes![
                home,
                login,
                login_post,
                register,
                register_post,
                google_login,
                google_callback,
                logout,
                expenses,
                create_expense,
                edit_expense,
                update_expense,
                delete_expense
            ],
        )
        .mount("/static", FileServer::from("static"))
        .attach(Template::fairing())
}

#[launch]
fn rocket() -> _ {
    build(rocket::Config::figment())
}
