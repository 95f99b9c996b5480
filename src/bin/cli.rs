use std::collections::HashSet;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::migrate::Migrator;
use sqlx::{Row, SqlitePool};

use ops_desk::authz::{parse_permissions, EmployeeStatus, Role};
use ops_desk::db;
use ops_desk::gateway::{DataGateway, FunctionRegistry, SqliteGateway};
use ops_desk::identity::{AccessUpdate, EmployeeDirectory};

#[derive(Parser, Debug)]
#[command(author, version, about = "ops-desk operations tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Set an employee's role, explicit permissions and optionally their status
    SetAccess {
        #[arg(long)]
        email: String,
        #[arg(long)]
        role: String,
        /// Permission in `<Module>:<action>` form, or `Admin Delegate`. Repeatable.
        #[arg(long = "permission")]
        permissions: Vec<String>,
        /// `active` or `inactive`; left unchanged when omitted
        #[arg(long)]
        status: Option<String>,
        /// Required to actually write the change
        #[arg(long)]
        confirm: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; when running in Docker the binary CWD may differ,
    // so fall back to the crate-local `.env` using CARGO_MANIFEST_DIR.
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            db::MIGRATOR.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            print_status(&pool, &db::MIGRATOR).await?;
        }
        Commands::SetAccess {
            email,
            role,
            permissions,
            status,
            confirm,
        } => {
            set_access(&email, &role, &permissions, status.as_deref(), confirm).await?;
        }
    }

    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    db::connect(&database_url).await
}

async fn print_status(pool: &SqlitePool, migrator: &Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let db_applied = sqlx::query("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
        .fetch_optional(pool)
        .await?;
    let applied_versions: HashSet<i64> = if db_applied.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let version = migration.version;
        let status = if applied_versions.contains(&version) { "applied" } else { "pending" };
        let desc = migration.description.as_ref().trim();
        let name = if !desc.is_empty() { desc } else { "unknown" };
        println!("{:<8} {:<20} {}", status, version, name);
    }

    Ok(())
}

async fn set_access(
    email: &str,
    role: &str,
    permissions: &[String],
    status: Option<&str>,
    confirm: bool,
) -> anyhow::Result<()> {
    let role = Role::parse(role).with_context(|| format!("unknown role `{role}`"))?;
    let permissions = parse_permissions(permissions.iter().map(String::as_str))?;
    let status = status
        .map(|raw| EmployeeStatus::parse(raw).with_context(|| format!("unknown status `{raw}`")))
        .transpose()?;

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    let pool = db::init(&database_url).await?;
    let gateway: std::sync::Arc<dyn DataGateway> = std::sync::Arc::new(SqliteGateway::new(pool, FunctionRegistry::new()));
    let directory = EmployeeDirectory::new(gateway);

    let employee = directory
        .find_by_email(email)
        .await?
        .with_context(|| format!("no employee with email {email}"))?;

    let mut requested: Vec<String> = permissions.iter().map(ToString::to_string).collect();
    requested.sort();
    let current: Vec<String> = employee.permissions.iter().map(ToString::to_string).collect();

    let target_status = status.unwrap_or(employee.status);
    if employee.role == role && employee.permissions == permissions && employee.status == target_status {
        println!("{} already has role {} and permissions {:?}; nothing to do", employee.email, role, current);
        return Ok(());
    }

    println!("{} ({})", employee.name, employee.email);
    println!("  role:        {} -> {}", employee.role, role);
    println!("  permissions: {:?} -> {:?}", current, requested);
    println!("  status:      {:?} -> {:?}", employee.status, target_status);

    if !confirm {
        anyhow::bail!("refusing to change access without --confirm");
    }

    let update = AccessUpdate {
        role: Some(role),
        permissions: Some(permissions),
        status,
    };
    directory.set_access(employee.id, &update).await?;
    println!("Access updated");
    Ok(())
}
