use command_guard::{CommandConfig, CommandError};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[error("inventory service: {0}")]
struct ServiceError(String);

// Even attempts fail, and every third one is slow
async fn call_service(attempt: u32) -> Result<(), ServiceError> {
    if attempt % 3 == 0 {
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    if attempt % 2 == 0 {
        return Err(ServiceError("External service error".to_string()));
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter("command_guard=debug")
        .init();

    command_guard::configure_command(
        "inventory",
        CommandConfig::new()
            .timeout(Duration::from_millis(200))
            .request_volume_threshold(4)
            .sleep_window(Duration::from_secs(1)),
    );

    for attempt in 1..=15 {
        println!("\nAttempt {}: ", attempt);

        match command_guard::execute_sync("inventory", call_service(attempt), None).await {
            Ok(()) => println!("Call succeeded"),
            Err(CommandError::CircuitOpen) => println!("Circuit is open, call was not attempted"),
            Err(CommandError::Timeout) => println!("Call timed out"),
            Err(err) => println!("Call failed with error: {}", err),
        }

        if let Ok(circuit) = command_guard::default_executor().circuit("inventory") {
            let health = circuit.snapshot();
            println!(
                "Current state: {}, error rate: {}% of {} requests",
                circuit.state(),
                health.error_percentage(),
                health.total_requests
            );
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
    }
}
