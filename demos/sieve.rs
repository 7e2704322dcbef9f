use sieve_telemetry::error::SystemError;
use sieve_telemetry::record::Extras;
use sieve_telemetry::{EnvironmentKind, Level, LoggerFactory, Settings};

fn main() {
    let factory = match LoggerFactory::from_env() {
        Ok(factory) => factory,
        Err(e) => {
            eprintln!("invalid settings ({}), falling back to defaults", e);
            LoggerFactory::new(Settings::new(EnvironmentKind::Dev))
        }
    };

    if let Err(e) = run(&factory) {
        eprintln!("sieve: {}", e);
    }

    factory.shutdown();
}

fn run(factory: &LoggerFactory) -> Result<(), Box<dyn std::error::Error>> {
    let logger = factory.get_logger("sieve")?;
    logger.debug("MESSAGE")?;

    let mut extra = Extras::new();
    extra.insert("stage", "startup");
    let err = SystemError::new("BAD VALUE").with_extra(extra.clone());
    logger
        .event(Level::Error, "EXCEPTION")
        .extras(extra)
        .exception(&err)
        .emit()?;
    Ok(())
}
