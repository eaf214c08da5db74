//! CLI module for the DealerDrive command-line interface.
//!
//! Without a subcommand the binary starts the server. Every other
//! subcommand talks to a running server through the client core:
//! - `login` / `register` / `logout` / `whoami` / `profile` - session
//! - `cars` / `book` / `bookings` / `cancel` - test drives
//! - `access <route>` - ask the access gate about a route
//! - `admin ...` - booking and account management
//! - `config check` - validate the configuration file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::booking::BookingStatus;
use crate::client::{
    AdminClient, ApiClient, BookingClient, FileTokenStore, SessionManager,
};
use crate::db::{
    CreateTestDriveRequest, RegisterRequest, TestDrive, TestDriveWithCar, UpdateProfileRequest,
    UserResponse, UserStatus,
};
use crate::policy::{self, Decision};

/// CLI arguments structure
#[derive(Parser, Debug)]
#[command(name = "dealerdrive")]
#[command(author, version, about = "Test-drive booking for car dealerships", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "dealerdrive.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// API URL to connect to
    #[arg(long, env = "DEALERDRIVE_API_URL", default_value = "http://localhost:4000")]
    pub api_url: String,

    /// Where the session token is kept between commands
    #[arg(long, env = "DEALERDRIVE_TOKEN_FILE", default_value = ".dealerdrive/token")]
    pub token_file: PathBuf,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the API server
    Serve,

    /// Sign in and remember the session
    Login {
        email: String,
        /// Password (or DEALERDRIVE_PASSWORD)
        #[arg(long, env = "DEALERDRIVE_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Create a customer account and sign in
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "DEALERDRIVE_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        phone: Option<String>,
    },

    /// Forget the stored session
    Logout,

    /// Show the signed-in account
    Whoami,

    /// Update the signed-in account's profile
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// Empty string clears the phone number
        #[arg(long)]
        phone: Option<String>,
    },

    /// List the car catalog
    Cars,

    /// Request a test drive
    Book {
        /// Car ID
        car: String,
        /// Date as YYYY-MM-DD
        date: String,
        /// Time slot, e.g. 10:00
        time: String,
        /// Contact name (defaults to the account name)
        #[arg(long)]
        name: Option<String>,
        /// Contact email (defaults to the account email)
        #[arg(long)]
        email: Option<String>,
        /// Contact phone (defaults to the account phone)
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },

    /// List your test drives
    Bookings,

    /// Cancel one of your test drives
    Cancel {
        /// Booking ID
        id: String,
    },

    /// Check whether the current session may open a route
    Access {
        /// Route path, e.g. /admin/test-drives
        route: String,
    },

    /// Administrator commands
    #[command(subcommand)]
    Admin(AdminCommands),

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
pub enum AdminCommands {
    /// List every booking
    Bookings {
        /// Only show bookings with this status
        #[arg(long)]
        status: Option<BookingStatus>,
    },
    /// Move a booking to a new status
    SetStatus { id: String, status: BookingStatus },
    /// List accounts
    Users,
    /// Activate or deactivate an account
    UserStatus { id: String, status: UserStatus },
    /// Remove an account without active bookings
    DeleteUser { id: String },
    /// Booking statistics
    Stats,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

impl Cli {
    /// True when the invocation should start the server
    pub fn is_serve(&self) -> bool {
        matches!(self.command, None | Some(Commands::Serve))
    }

    fn session(&self) -> Result<Arc<SessionManager>> {
        let api = ApiClient::new(self.api_url.clone())?;
        let store = Arc::new(FileTokenStore::new(self.token_file.clone()));
        Ok(Arc::new(SessionManager::new(api, store)))
    }

    /// Session with the persisted credential resolved
    async fn restored_session(&self) -> Result<Arc<SessionManager>> {
        let session = self.session()?;
        if let Err(failure) = session.restore().await {
            tracing::debug!(error = %failure, "Stored session could not be restored");
        }
        Ok(session)
    }
}

/// Run a CLI command
pub async fn run_command(cli: &Cli) -> Result<()> {
    match &cli.command {
        None | Some(Commands::Serve) => {
            // Handled in main.rs
            Ok(())
        }
        Some(Commands::Login { email, password }) => cmd_login(cli, email, password).await,
        Some(Commands::Register {
            name,
            email,
            password,
            phone,
        }) => {
            let request = RegisterRequest {
                name: name.clone(),
                email: email.clone(),
                password: password.clone(),
                phone: phone.clone(),
            };
            cmd_register(cli, &request).await
        }
        Some(Commands::Logout) => cmd_logout(cli),
        Some(Commands::Whoami) => cmd_whoami(cli).await,
        Some(Commands::Profile { name, email, phone }) => {
            let fields = UpdateProfileRequest {
                name: name.clone(),
                email: email.clone(),
                phone: phone.clone(),
            };
            cmd_profile(cli, &fields).await
        }
        Some(Commands::Cars) => cmd_cars(cli).await,
        Some(Commands::Book {
            car,
            date,
            time,
            name,
            email,
            phone,
            notes,
        }) => {
            let contact = Contact {
                name: name.clone(),
                email: email.clone(),
                phone: phone.clone(),
            };
            cmd_book(cli, car, date, time, contact, notes.clone()).await
        }
        Some(Commands::Bookings) => cmd_bookings(cli).await,
        Some(Commands::Cancel { id }) => cmd_cancel(cli, id).await,
        Some(Commands::Access { route }) => cmd_access(cli, route).await,
        Some(Commands::Admin(command)) => cmd_admin(cli, command).await,
        Some(Commands::Config(ConfigCommands::Check)) => cmd_config_check(cli),
    }
}

async fn cmd_login(cli: &Cli, email: &str, password: &str) -> Result<()> {
    let session = cli.session()?;
    let user = session.login(email, password).await?;
    println!("Signed in as {} <{}> ({})", user.name, user.email, user.role);
    Ok(())
}

async fn cmd_register(cli: &Cli, request: &RegisterRequest) -> Result<()> {
    let session = cli.session()?;
    let user = session.register(request).await?;
    println!("Account created. Signed in as {} <{}>", user.name, user.email);
    Ok(())
}

fn cmd_logout(cli: &Cli) -> Result<()> {
    cli.session()?.logout();
    println!("Signed out.");
    Ok(())
}

async fn cmd_whoami(cli: &Cli) -> Result<()> {
    let session = cli.restored_session().await?;
    let snapshot = session.snapshot();
    match snapshot.identity() {
        Some(user) => print_user(user),
        None => println!("Not signed in."),
    }
    println!("Start page: {}", policy::home_route(snapshot.access_context()));
    Ok(())
}

async fn cmd_profile(cli: &Cli, fields: &UpdateProfileRequest) -> Result<()> {
    let session = cli.restored_session().await?;
    let user = session.update_profile(fields).await?;
    println!("Profile updated.");
    print_user(&user);
    Ok(())
}

fn print_user(user: &UserResponse) {
    println!();
    println!("ID:      {}", user.id);
    println!("Name:    {}", user.name);
    println!("Email:   {}", user.email);
    println!("Phone:   {}", user.phone.as_deref().unwrap_or("-"));
    println!("Role:    {}", user.role);
    println!("Status:  {}", user.status.as_str());
    println!("Since:   {}", user.created_at);
    println!();
}

async fn cmd_cars(cli: &Cli) -> Result<()> {
    let bookings = BookingClient::new(cli.session()?);
    let cars = bookings.cars().await?;

    if cars.is_empty() {
        println!("No cars in the catalog.");
        return Ok(());
    }

    println!();
    println!(
        "{:<36}  {:<28}  {:<6}  {:<10}  {:>12}",
        "ID", "CAR", "YEAR", "FUEL", "PRICE"
    );
    println!("{}", "-".repeat(100));
    for car in cars {
        println!(
            "{:<36}  {:<28}  {:<6}  {:<10}  {:>12.2}",
            car.id,
            truncate(&format!("{} {}", car.make, car.model), 28),
            car.year,
            car.fuel_type,
            car.price
        );
    }
    println!();
    Ok(())
}

/// Contact details given on the command line; gaps are filled from the account
struct Contact {
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
}

/// Slot list from the config file, or the defaults when it cannot be loaded
fn booking_time_slots(path: &Path) -> Vec<String> {
    match crate::config::Config::load(path) {
        Ok(config) => config.booking.time_slots,
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %path.display(),
                "Could not load configuration, using the default time slots"
            );
            crate::config::default_time_slots()
        }
    }
}

async fn cmd_book(
    cli: &Cli,
    car: &str,
    date: &str,
    time: &str,
    contact: Contact,
    notes: Option<String>,
) -> Result<()> {
    let session = cli.restored_session().await?;
    let bookings =
        BookingClient::new(session.clone()).with_time_slots(booking_time_slots(&cli.config));

    let snapshot = session.snapshot();
    let user = snapshot
        .identity()
        .context("Not signed in. Run `dealerdrive login` first.")?;

    let request = CreateTestDriveRequest {
        car_id: car.to_string(),
        date: date.to_string(),
        time: time.to_string(),
        customer_name: contact.name.unwrap_or_else(|| user.name.clone()),
        customer_email: contact.email.unwrap_or_else(|| user.email.clone()),
        customer_phone: contact
            .phone
            .or_else(|| user.phone.clone())
            .unwrap_or_default(),
        notes,
    };

    let known: Vec<TestDrive> = bookings
        .my_bookings()
        .await
        .map(|list| list.into_iter().map(|b| b.booking).collect())
        .unwrap_or_default();

    let booking = bookings.submit(&request, &known).await?;
    println!(
        "Test drive requested for {} at {} (status: {}).",
        booking.date, booking.time, booking.status
    );
    println!("Booking ID: {}", booking.id);
    Ok(())
}

async fn cmd_bookings(cli: &Cli) -> Result<()> {
    let bookings = BookingClient::new(cli.restored_session().await?);
    let list = bookings.my_bookings().await?;
    print_bookings(&list, false);
    Ok(())
}

async fn cmd_cancel(cli: &Cli, id: &str) -> Result<()> {
    let bookings = BookingClient::new(cli.restored_session().await?);
    let booking = bookings.cancel(id).await?;
    println!("Booking {} is now {}.", booking.id, booking.status);
    Ok(())
}

async fn cmd_access(cli: &Cli, route: &str) -> Result<()> {
    let session = cli.restored_session().await?;
    let context = session.snapshot().access_context();

    match policy::can_access(route, context) {
        Decision::Allow => println!("[OK] {} may be opened", route),
        Decision::Pending => println!("[..] {} is waiting for the session to resolve", route),
        Decision::Redirect(target) => println!("[->] {} redirects to {}", route, target),
    }

    let capabilities = policy::capabilities(context);
    let names: Vec<String> = capabilities
        .iter()
        .filter_map(|c| serde_json::to_value(c).ok())
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    println!("Capabilities: {}", names.join(", "));
    Ok(())
}

async fn cmd_admin(cli: &Cli, command: &AdminCommands) -> Result<()> {
    let session = cli.restored_session().await?;

    match command {
        AdminCommands::Bookings { status } => {
            let list = BookingClient::new(session).all_bookings(*status).await?;
            print_bookings(&list, true);
        }
        AdminCommands::SetStatus { id, status } => {
            let booking = BookingClient::new(session).set_status(id, *status).await?;
            println!("Booking {} is now {}.", booking.id, booking.status);
        }
        AdminCommands::Stats => {
            let stats = BookingClient::new(session).stats().await?;
            println!();
            println!("=== Test Drive Statistics ===");
            println!();
            println!("Cars:        {}", stats.total_cars);
            println!("Users:       {}", stats.total_users);
            println!("Test drives: {}", stats.total_test_drives);
            println!("  Pending:   {}", stats.pending);
            println!("  Confirmed: {}", stats.confirmed);
            println!("  Completed: {}", stats.completed);
            println!("  Cancelled: {}", stats.cancelled);
            if !stats.popular_cars.is_empty() {
                println!();
                println!("Most requested:");
                for car in &stats.popular_cars {
                    println!("  {:<30} {}", truncate(&car.car, 30), car.test_drives);
                }
            }
            println!();
        }
        AdminCommands::Users => {
            let users = AdminClient::new(session).users().await?;
            println!();
            println!(
                "{:<36}  {:<24}  {:<30}  {:<6}  {:<8}",
                "ID", "NAME", "EMAIL", "ROLE", "STATUS"
            );
            println!("{}", "-".repeat(112));
            for user in users {
                println!(
                    "{:<36}  {:<24}  {:<30}  {:<6}  {:<8}",
                    user.id,
                    truncate(&user.name, 24),
                    truncate(&user.email, 30),
                    user.role,
                    user.status.as_str()
                );
            }
            println!();
        }
        AdminCommands::UserStatus { id, status } => {
            let user = AdminClient::new(session).set_user_status(id, *status).await?;
            println!("{} is now {}.", user.email, user.status.as_str());
        }
        AdminCommands::DeleteUser { id } => {
            AdminClient::new(session).delete_user(id).await?;
            println!("User {} deleted.", id);
        }
    }
    Ok(())
}

fn print_bookings(list: &[TestDriveWithCar], with_customer: bool) {
    if list.is_empty() {
        println!("No test drives found.");
        return;
    }

    println!();
    if with_customer {
        println!(
            "{:<36}  {:<24}  {:<10}  {:<5}  {:<9}  {:<20}",
            "ID", "CAR", "DATE", "TIME", "STATUS", "CUSTOMER"
        );
        println!("{}", "-".repeat(114));
    } else {
        println!(
            "{:<36}  {:<24}  {:<10}  {:<5}  {:<9}",
            "ID", "CAR", "DATE", "TIME", "STATUS"
        );
        println!("{}", "-".repeat(92));
    }

    for entry in list {
        let car = entry
            .car
            .as_ref()
            .map(|c| c.display_name())
            .unwrap_or_else(|| "-".to_string());
        let booking = &entry.booking;
        if with_customer {
            println!(
                "{:<36}  {:<24}  {:<10}  {:<5}  {:<9}  {:<20}",
                booking.id,
                truncate(&car, 24),
                booking.date,
                booking.time,
                booking.status,
                truncate(&booking.customer_name, 20)
            );
        } else {
            println!(
                "{:<36}  {:<24}  {:<10}  {:<5}  {:<9}",
                booking.id,
                truncate(&car, 24),
                booking.date,
                booking.time,
                booking.status
            );
        }
    }
    println!();
}

fn cmd_config_check(cli: &Cli) -> Result<()> {
    use crate::config::Config;

    let config_path = &cli.config;
    println!("Checking configuration file: {}", config_path.display());
    println!();

    if !config_path.exists() {
        println!(
            "[!!] Configuration file not found: {}",
            config_path.display()
        );
        println!();
        println!("A default configuration will be used when starting the server.");
        return Ok(());
    }

    match Config::load(config_path) {
        Ok(config) => {
            println!("[OK] Configuration file is valid!");
            println!();
            println!("Server:");
            println!("  Address:      {}:{}", config.server.host, config.server.port);
            println!("  Data Dir:     {}", config.server.data_dir.display());
            println!(
                "  CORS Origins: {}",
                if config.server.cors_origins.is_empty() {
                    "-".to_string()
                } else {
                    config.server.cors_origins.join(", ")
                }
            );
            println!();
            println!("Security:");
            println!("  Admin Email:  {}", config.auth.admin_email);
            println!("  Session TTL:  {}h", config.auth.session_ttl_hours);
            println!(
                "  Rate Limiting: {}",
                if config.rate_limit.enabled {
                    "Enabled"
                } else {
                    "Disabled"
                }
            );
            println!();
            println!("Booking:");
            println!("  Time Slots:   {}", config.booking.time_slots.join(", "));
            println!(
                "  Demo Cars:    {}",
                if config.seed.demo_cars {
                    "Seeded"
                } else {
                    "Off"
                }
            );
            println!();
            Ok(())
        }
        Err(e) => {
            println!("[!!] Configuration file is invalid:");
            println!("     {:#}", e);
            anyhow::bail!("Invalid configuration")
        }
    }
}

/// Truncate a string to max length with ellipsis
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
