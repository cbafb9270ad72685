//! Utility functions for minisearch

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

/// Generate a node id: 16 random bytes, URL-safe base64 without padding.
pub fn generate_node_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a random UUID string for cluster states and indices
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Strict majority check: `votes` out of `total`
pub fn is_majority(votes: usize, total: usize) -> bool {
    total > 0 && votes * 2 > total
}

/// Retry with exponential backoff
pub async fn retry_with_backoff<F, Fut, T>(
    mut f: F,
    max_retries: usize,
    initial_delay: std::time::Duration,
) -> crate::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::Result<T>>,
{
    let mut delay = initial_delay;

    for attempt in 0..max_retries {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < max_retries - 1 => {
                tracing::warn!(
                    "Retry attempt {} failed: {}, retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }

    Err(crate::Error::Internal("Max retries exceeded".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_node_id_shape() {
        for _ in 0..100 {
            let id = generate_node_id();
            assert_eq!(id.len(), 22);
            assert!(id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
            assert!(!id.contains('='));
            let decoded = URL_SAFE_NO_PAD.decode(&id).unwrap();
            assert_eq!(decoded.len(), 16);
        }
    }

    #[test]
    fn test_node_ids_do_not_collide() {
        let ids: HashSet<String> = (0..10_000).map(|_| generate_node_id()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_is_majority() {
        assert!(!is_majority(0, 0));
        assert!(is_majority(1, 1));
        assert!(!is_majority(1, 2));
        assert!(is_majority(2, 3));
        assert!(!is_majority(2, 4));
        assert!(is_majority(3, 5));
    }

    #[test]
    fn test_generate_uuid_unique() {
        assert_ne!(generate_uuid(), generate_uuid());
        assert_eq!(generate_uuid().len(), 32);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_recovers() {
        let mut calls = 0;
        let result = retry_with_backoff(
            || {
                calls += 1;
                let attempt = calls;
                async move {
                    if attempt < 3 {
                        Err(crate::Error::Timeout("flaky".into()))
                    } else {
                        Ok(attempt)
                    }
                }
            },
            5,
            std::time::Duration::from_millis(1),
        )
        .await
        .unwrap();
        assert_eq!(result, 3);
    }
}
