use crate::commands::{exit_code, load_config, migrated_pool, runtime, CommandResult, StepError};
use cotiza_core::audit::AuditContext;
use cotiza_db::{QuoteService, ServiceSettings};

pub fn run() -> CommandResult {
    let config = match load_config("expire") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("expire") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = migrated_pool(&config).await?;
        let service = QuoteService::new(pool.clone(), ServiceSettings::from_config(&config));
        let audit = AuditContext::system("cotiza-cli");

        let swept = service
            .mark_expired_quotes(&audit)
            .await
            .map_err(|error| ("expiration_sweep", error.to_string(), exit_code::OPERATION));
        pool.close().await;
        Ok::<_, StepError>(swept?)
    });

    match result {
        Ok(0) => CommandResult::success("expire", "no quotes past their validity date"),
        Ok(expired) => {
            CommandResult::success("expire", format!("marked {expired} quote(s) as expired"))
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("expire", error_class, message, exit_code)
        }
    }
}
