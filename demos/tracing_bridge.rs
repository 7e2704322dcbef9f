use sieve_telemetry::error::SystemError;
use sieve_telemetry::init::init_from_env;
use tracing::{debug, error, info, instrument};

#[instrument]
fn handle_request(user_id: u64) {
    info!(target: "sieve.api", user_id, "request accepted");
    let err = SystemError::new("invalid password");
    error!(
        target: "sieve.api",
        error = &err as &(dyn std::error::Error + 'static),
        reason = "authentication failed",
        "request rejected"
    );
}

fn main() {
    let factory = match init_from_env() {
        Ok(factory) => factory,
        Err(e) => {
            eprintln!("failed to initialise logging: {}", e);
            return;
        }
    };

    debug!(target: "sieve", "starting service");
    handle_request(42);
    debug!(target: "sieve", stack_info = true, "shutting down");

    factory.shutdown();
}
