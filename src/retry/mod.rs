//! # Módulo de Retry
//!
//! O backoff que o Conduit usa entre tentativas de navegação, resolução
//! de obstrução, planos de IA vazios/rejeitados e ciclos Validate→Repair.
//!
//! ## O que é Backoff Exponencial com Jitter?
//!
//! É uma técnica onde esperamos cada vez mais entre tentativas, com um
//! pouco de aleatoriedade, para evitar que múltiplas tentativas concorrentes
//! batam no serviço de renderização no mesmo instante (thundering herd).
//!
//! `delay = min(base * 2^attempt, max) + uniform(0, base)` quando jitter
//! está habilitado.

use std::time::Duration;

/// O backoff do Conduit: `min(base * 2^attempt, max) + uniform(0, base)`
/// quando jitter está habilitado. Usado por `Conduit::backoff` em toda
/// fase que pode reentrar (Navigate, Obstruct, AiReason, Validate/Repair).
pub fn conduit_backoff(attempt: u32, base_ms: u64, max_ms: u64, jitter: bool) -> Duration {
    let base = base_ms as f64 / 1000.0;
    let max_delay = max_ms as f64 / 1000.0;
    let mut delay = (base * 2f64.powi(attempt as i32)).min(max_delay);
    if jitter {
        delay += rand::random::<f64>() * base;
    }
    Duration::from_secs_f64(delay.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conduit_backoff_caps_at_max_delay() {
        let delay = conduit_backoff(10, 1000, 5000, false);
        assert_eq!(delay, Duration::from_secs(5));
    }

    #[test]
    fn conduit_backoff_grows_exponentially_before_cap() {
        let d0 = conduit_backoff(0, 1000, 30000, false);
        let d1 = conduit_backoff(1, 1000, 30000, false);
        let d2 = conduit_backoff(2, 1000, 30000, false);
        assert_eq!(d0, Duration::from_secs(1));
        assert_eq!(d1, Duration::from_secs(2));
        assert_eq!(d2, Duration::from_secs(4));
    }

    #[test]
    fn conduit_backoff_jitter_stays_within_one_base_unit() {
        let base = Duration::from_secs(1);
        for _ in 0..20 {
            let delay = conduit_backoff(0, 1000, 30000, true);
            assert!(delay >= base);
            assert!(delay <= base + base);
        }
    }
}
