#!/usr/bin/env cargo
//! Access token utility for Jotter
//!
//! Mints an access token for an existing user so a WebSocket client can be
//! pointed at a local server without going through the login surface.
//!
//! Usage:
//!   cargo run --bin issue-token alice@example.com
//!   cargo run --bin issue-token            (prompts for the email)
//!
//! Reads `DATABASE_URL`, `JWT_SECRET` and `JWT_EXPIRY_HOURS` like the server.

use std::env;
use std::io::{self, Write};

use anyhow::{bail, Context};

use jotter_api::auth::JwtManager;
use jotter_api::store::{PgStore, UserDirectory};
use jotter_api::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let email = if let Some(email) = env::args().nth(1) {
        email
    } else {
        print!("Enter user email: ");
        io::stdout().flush()?;

        let mut email = String::new();
        io::stdin().read_line(&mut email)?;
        email.trim().to_string()
    };

    if email.is_empty() {
        bail!("email cannot be empty");
    }

    let config = Config::from_env().context("invalid configuration")?;
    let pool = jotter_shared::create_pool(&config.database_url, 1)
        .await
        .context("failed to connect to database")?;
    let store = PgStore::new(pool);

    let Some(user) = store.find_by_email(&email).await? else {
        bail!("no user with email {email}");
    };
    if !user.is_active {
        eprintln!("Warning: {} is inactive; the gateway will reject this token.", user.email);
    }

    let jwt = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
    let (token, jti) = jwt.generate_access_token(user.id, &user.email)?;

    println!("\n===========================================");
    println!("Access token for {} ({})", user.email, user.id);
    println!("===========================================");
    println!("{}", token);
    println!("===========================================\n");

    println!("Token id: {}", jti);
    println!("Expires in: {} hours", config.jwt_expiry_hours);
    println!("\nConnect with:");
    println!("  ws://{}/ws?token=<token>", config.bind_address);

    Ok(())
}
