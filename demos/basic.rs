//! Session counter, error handling, and login-protected routes.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -c jar -b jar http://localhost:8080/
//!   curl http://localhost:8080/error
//!   curl -X POST -c jar -b jar 'http://localhost:8080/signup?user=billy&pass=hunter2'
//!   curl -b jar http://localhost:8080/secure
//!   curl -u billy:hunter2 http://localhost:8080/basic

use goat::auth::{self, User};
use goat::handler::unauthorized;
use goat::interceptor::{BasicAuth, SessionAuth};
use goat::middleware::{DatabaseMiddleware, SessionMiddleware};
use goat::{
    Config, Context, CookieStore, Dispatcher, HandlerError, HandlerResult, Methods, Request,
    Response, Router, Server,
};
use http::StatusCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), goat::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    let database_url = config
        .database_url
        .clone()
        .unwrap_or_else(|| "memory://localhost/goat".to_owned());

    let router = Router::new()
        .get("/", "index", index)
        .get("/error", "error", error_route)
        .post("/signup", "signup", signup)
        .intercept("/secure", "secure", Methods::GET, SessionAuth::new(secure, unauthorized))
        .intercept("/basic", "basic", Methods::GET, BasicAuth::new(secure));

    let store = CookieStore::new(config.session_secret.as_bytes());
    let app = Dispatcher::with_config(router, &config)
        .middleware(SessionMiddleware::new(store, &config.session_name))
        .middleware(DatabaseMiddleware::connect(
            &database_url,
            config.database_name.as_deref(),
        )?);

    Server::bind_addr(config.addr).serve(app).await
}

// GET / counts visits in the session.
async fn index(_req: Request, ctx: Context) -> HandlerResult<String> {
    let count = ctx
        .session_value("counter")
        .and_then(|v| v.as_u64())
        .map_or(0, |n| n + 1);
    ctx.set_session_value("counter", count);
    Ok(format!("You got here to the index! You have been here {count} times!"))
}

// GET /error: the dispatcher turns this into a 500.
async fn error_route(_req: Request, _ctx: Context) -> HandlerResult {
    Err(HandlerError::msg("This is a 500! Goat handles your errors for you!"))
}

// POST /signup?user=..&pass=.. creates an account and logs it in.
async fn signup(req: Request, ctx: Context) -> HandlerResult {
    let query = req.query().unwrap_or_default();
    let field = |name: &str| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    };
    let (Some(username), Some(password)) = (field("user"), field("pass")) else {
        return Ok(Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .text("user and pass are required"));
    };

    let db = ctx.database()?;
    let user = match User::new(&db, &username, &password).await {
        Ok(user) => user,
        Err(auth::AuthError::UsernameTaken) => {
            return Ok(Response::builder().status(StatusCode::CONFLICT).text("username taken"));
        }
        Err(e) => return Err(e.into()),
    };
    user.save(&db).await?;
    user.login(&ctx)?;
    Ok(Response::redirect("/secure"))
}

async fn secure(_req: Request, ctx: Context) -> HandlerResult<String> {
    let name = ctx.user().map(|u| u.username).unwrap_or_default();
    Ok(format!("Welcome back, {name}."))
}
