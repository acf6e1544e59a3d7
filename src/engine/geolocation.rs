use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::GeolocationError;
use crate::models::location::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
}

pub const HIGH_ACCURACY: PositionOptions = PositionOptions {
    high_accuracy: true,
    timeout: Duration::from_secs(15),
};

pub const LOW_ACCURACY: PositionOptions = PositionOptions {
    high_accuracy: false,
    timeout: Duration::from_secs(8),
};

/// Reads the user's own position.
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn current_position(&self, options: PositionOptions) -> Result<GeoPoint, GeolocationError>;
}

/// Position from configuration; unavailable when none is set.
#[derive(Debug, Clone, Default)]
pub struct FixedPositionSource {
    position: Option<GeoPoint>,
}

impl FixedPositionSource {
    pub fn new(position: Option<GeoPoint>) -> Self {
        Self { position }
    }
}

#[async_trait]
impl PositionSource for FixedPositionSource {
    async fn current_position(&self, _options: PositionOptions) -> Result<GeoPoint, GeolocationError> {
        self.position.ok_or_else(|| {
            GeolocationError::Unavailable("no position source configured".to_string())
        })
    }
}

async fn attempt(
    source: &dyn PositionSource,
    options: PositionOptions,
) -> Result<GeoPoint, GeolocationError> {
    let point = timeout(options.timeout, source.current_position(options))
        .await
        .unwrap_or(Err(GeolocationError::Timeout))?;
    if !point.is_valid() {
        return Err(GeolocationError::Unavailable(format!(
            "reported position ({}, {}) is out of range",
            point.lat, point.lng
        )));
    }
    Ok(point)
}

/// High accuracy first, then a shorter low-accuracy attempt. A permission
/// denial from either attempt wins over other failures.
pub async fn locate_user(source: &dyn PositionSource) -> Result<GeoPoint, GeolocationError> {
    let first = match attempt(source, HIGH_ACCURACY).await {
        Ok(point) => return Ok(point),
        Err(err) => err,
    };
    debug!(error = %first, "high accuracy position failed; retrying with low accuracy");

    match attempt(source, LOW_ACCURACY).await {
        Ok(point) => Ok(point),
        Err(second) => {
            let err = if first == GeolocationError::PermissionDenied {
                first
            } else {
                second
            };
            warn!(error = %err, "could not read user position");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    struct ScriptedSource {
        responses: Mutex<VecDeque<(Duration, Result<GeoPoint, GeolocationError>)>>,
        seen: Mutex<Vec<PositionOptions>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<(Duration, Result<GeoPoint, GeolocationError>)>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PositionSource for ScriptedSource {
        async fn current_position(
            &self,
            options: PositionOptions,
        ) -> Result<GeoPoint, GeolocationError> {
            self.seen.lock().unwrap().push(options);
            let (delay, result) = self.responses.lock().unwrap().pop_front().unwrap();
            tokio::time::sleep(delay).await;
            result
        }
    }

    const HOME: GeoPoint = GeoPoint {
        lat: 6.93,
        lng: 79.86,
    };

    #[tokio::test(start_paused = true)]
    async fn high_accuracy_success_needs_one_attempt() {
        let source = ScriptedSource::new(vec![(Duration::from_secs(2), Ok(HOME))]);
        assert_eq!(locate_user(&source).await, Ok(HOME));
        assert_eq!(*source.seen.lock().unwrap(), vec![HIGH_ACCURACY]);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_falls_back_to_low_accuracy() {
        let source = ScriptedSource::new(vec![
            (Duration::from_secs(60), Ok(HOME)),
            (Duration::from_secs(1), Ok(HOME)),
        ]);
        assert_eq!(locate_user(&source).await, Ok(HOME));
        assert_eq!(*source.seen.lock().unwrap(), vec![HIGH_ACCURACY, LOW_ACCURACY]);
    }

    #[tokio::test(start_paused = true)]
    async fn both_attempts_timing_out_reports_timeout() {
        let source = ScriptedSource::new(vec![
            (Duration::from_secs(60), Ok(HOME)),
            (Duration::from_secs(60), Ok(HOME)),
        ]);
        assert_eq!(locate_user(&source).await, Err(GeolocationError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn permission_denial_is_reported_over_later_failures() {
        let source = ScriptedSource::new(vec![
            (Duration::ZERO, Err(GeolocationError::PermissionDenied)),
            (Duration::from_secs(60), Ok(HOME)),
        ]);
        assert_eq!(
            locate_user(&source).await,
            Err(GeolocationError::PermissionDenied)
        );
    }

    #[tokio::test]
    async fn fixed_source_without_position_is_unavailable() {
        let err = locate_user(&FixedPositionSource::default()).await.unwrap_err();
        assert!(matches!(err, GeolocationError::Unavailable(_)));

        let fixed = FixedPositionSource::new(Some(HOME));
        assert_eq!(locate_user(&fixed).await, Ok(HOME));
    }
}
