//! Starter data seed script
//!
//! Creates the `admin` and `user` roles, the `ccc` / `ddd` permissions and
//! two accounts: `zhangsan` (admin, both permissions) and `lisi` (regular
//! user, `ccc` only). Existing rows are left untouched.
//!
//! Usage:
//!   DATABASE_URL=... ./seed [--password 888888]

use anyhow::Context;
use clap::Parser;

use meeting_room_api::{db, services::user::UserService};

#[derive(Parser)]
#[command(name = "seed", about = "Seed roles, permissions and demo accounts")]
struct Args {
    /// Password given to both seeded accounts
    #[arg(long, env = "SEED_PASSWORD", default_value = "888888")]
    password: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL required")?;

    let pool = db::create_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    UserService::seed_initial_data(&pool, &args.password)
        .await
        .context("Failed to seed initial data")?;

    tracing::info!("Seed data in place: zhangsan (admin), lisi (user)");
    Ok(())
}
