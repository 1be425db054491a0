use crate::commands::{exit_code, load_config, migrated_pool, runtime, CommandResult, StepError};
use cotiza_db::SeedDataset;

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;

        let seeded = SeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), exit_code::OPERATION))?;
        let verification = SeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), exit_code::CHECK_FAILED))?;
        pool.close().await;

        let failed_checks = verification
            .checks
            .iter()
            .filter_map(|(id, present)| (!present).then_some(*id))
            .collect::<Vec<_>>();
        if !verification.all_present {
            let message = verification_message(&failed_checks);
            return Err(("seed_verification", message, exit_code::CHECK_FAILED));
        }

        Ok::<_, StepError>(format!(
            "demo data ready: clients [{}], products [{}]",
            seeded.clients.join(", "),
            seeded.products.join(", ")
        ))
    });

    match result {
        Ok(message) => CommandResult::success("seed", message),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

/// Rows that exist with a different active flag or stock tracking also fail,
/// since the demo flows depend on them.
fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "some demo rows failed to load".to_string()
    } else {
        format!("demo rows missing or altered: {}", failed_checks.join(", "))
    }
}
