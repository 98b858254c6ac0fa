use crate::models::RegisterUser;
use crate::services::{users, ServiceError};
use crate::{Config, Database};
use anyhow::Result;
use std::path::Path;

use super::UserCommand;

pub async fn run(config_path: &Path, command: UserCommand) -> Result<()> {
    let config = Config::load(config_path)?;
    let db = Database::open(&config.database.path, config.database.pool_size)?;
    db.migrate()?;

    match command {
        UserCommand::Add {
            username,
            email,
            password,
            first_name,
            last_name,
        } => {
            let password = match password {
                Some(p) => p,
                None => {
                    let p = rpassword::prompt_password("Password: ")?;
                    let p_confirm = rpassword::prompt_password("Confirm password: ")?;
                    if p != p_confirm {
                        anyhow::bail!("Passwords do not match");
                    }
                    p
                }
            };

            let input = RegisterUser {
                username,
                email,
                first_name,
                last_name,
                password,
            };
            match users::create_active_user(&db, &input) {
                Ok(user) => tracing::info!("User '{}' created (id {})", user.username, user.id),
                Err(ServiceError::Invalid(errors)) => anyhow::bail!("Invalid user: {}", errors),
                Err(e) => return Err(e.into()),
            }
        }
        UserCommand::List => {
            println!(
                "{:<20} {:<30} {:<8} {:<25}",
                "USERNAME", "EMAIL", "ACTIVE", "JOINED"
            );
            println!("{}", "-".repeat(85));
            for user in users::list_users(&db)? {
                println!(
                    "{:<20} {:<30} {:<8} {:<25}",
                    user.username,
                    user.email,
                    if user.is_active { "yes" } else { "no" },
                    user.date_joined
                );
            }
        }
        UserCommand::Remove { username } => {
            if users::delete_user_by_username(&db, &username)? {
                tracing::info!("User '{}' removed", username);
            } else {
                tracing::warn!("User '{}' not found", username);
            }
        }
        UserCommand::Activate { username } => match users::get_user_by_username(&db, &username)? {
            Some(user) if user.is_active => tracing::info!("User '{}' is already active", username),
            Some(user) => {
                users::set_active(&db, user.id, true)?;
                tracing::info!("User '{}' activated", username);
            }
            None => tracing::warn!("User '{}' not found", username),
        },
    }

    Ok(())
}
