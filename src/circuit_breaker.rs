use failsafe::{backoff, failure_policy, Config, StateMachine};
use std::time::Duration;

/// Breaker type guarding the geocoding provider.
pub type ProviderBreaker = StateMachine<
    failure_policy::ConsecutiveFailures<backoff::Exponential>,
    (),
>;

/// Creates a circuit breaker for the geocoding provider to stop hammering it
/// while it is failing.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive transport/provider failures triggers OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// # States
///
/// - **CLOSED**: Normal operation, requests pass through.
/// - **OPEN**: Too many failures, records fail fast with `GeoError::CircuitOpen`.
/// - **HALF_OPEN**: Testing if the provider recovered.
///
/// The runner reports outcomes itself through `on_success` / `on_error`, since
/// only some geocoding failures (not "no results") count against the provider.
///
/// # Returns
///
/// * `ProviderBreaker` - The configured circuit breaker instance.
pub fn create_geocoding_circuit_breaker() -> ProviderBreaker {
    let backoff_strategy = backoff::exponential(
        Duration::from_secs(10), // Initial delay
        Duration::from_secs(60), // Maximum delay
    );

    let failure_policy = failure_policy::consecutive_failures(5, backoff_strategy);

    Config::new().failure_policy(failure_policy).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_opens_after_failures() {
        let cb = create_geocoding_circuit_breaker();

        for _ in 0..4 {
            assert!(cb.is_call_permitted());
            cb.on_error();
        }
        assert!(cb.is_call_permitted());

        // Fifth consecutive failure opens the circuit
        cb.on_error();
        assert!(!cb.is_call_permitted());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = create_geocoding_circuit_breaker();

        for _ in 0..4 {
            cb.on_error();
        }
        cb.on_success();
        for _ in 0..4 {
            cb.on_error();
        }

        assert!(cb.is_call_permitted());
    }
}
