use std::sync::Arc;

use app::user;
use dashmap::{mapref::entry::Entry, DashMap};
use std::time::Duration;

pub struct RateLimit {
    limit: usize,
    span: Duration,
    counter: Arc<DashMap<user::Id, usize>>,
}

impl RateLimit {
    pub fn new(limit: usize, span: Duration) -> Self {
        Self {
            limit,
            span,
            counter: Arc::new(Default::default()),
        }
    }

    /// Returns true if the user should be rate limited, false otherwise.
    pub fn limit(&self, user_id: user::Id) -> bool {
        match self.counter.entry(user_id) {
            Entry::Occupied(mut count) => {
                let count = count.get_mut();
                if *count >= self.limit {
                    true
                } else {
                    *count += 1;
                    self.decrement_later(user_id);
                    false
                }
            }
            Entry::Vacant(e) => {
                e.insert(0);
                false
            }
        }
    }

    #[cfg(test)]
    fn outstanding(&self, user_id: user::Id) -> usize {
        self.counter.get(&user_id).map(|v| *v).unwrap_or(0)
    }

    fn decrement_later(&self, user_id: user::Id) {
        let counter = Arc::clone(&self.counter);
        let span = self.span;
        tokio::spawn(async move {
            tokio::time::sleep(span).await;
            match counter.entry(user_id) {
                Entry::Occupied(mut e) => {
                    let v = e.get_mut();
                    *v -= 1;
                    if *v == 0 {
                        e.remove();
                    }
                }
                Entry::Vacant(_) => {
                    log::error!(
                        "entry should not be vacant, this is a bug. user id {:?}",
                        user_id
                    );
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn limit_blocks_once_the_count_reaches_the_configured_limit() {
        let rl = RateLimit::new(2, Duration::from_secs(60));
        let user_id = user::Id(uuid::Uuid::nil());

        assert!(!rl.limit(user_id));
        assert!(!rl.limit(user_id));
        assert!(!rl.limit(user_id));
        assert!(rl.limit(user_id));
    }

    #[tokio::test]
    async fn limit_tracks_each_user_independently() {
        let rl = RateLimit::new(1, Duration::from_secs(60));
        let a = user::Id(uuid::Uuid::nil());
        let b = user::Id(uuid::Uuid::new_v4());

        assert!(!rl.limit(a));
        assert!(!rl.limit(a));
        assert!(rl.limit(a));
        assert!(!rl.limit(b));
    }

    #[tokio::test(start_paused = true)]
    async fn outstanding_count_decays_after_the_span_elapses() {
        let rl = RateLimit::new(1, Duration::from_secs(10));
        let user_id = user::Id(uuid::Uuid::nil());

        rl.limit(user_id);
        rl.limit(user_id);
        assert_eq!(rl.outstanding(user_id), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;

        assert_eq!(rl.outstanding(user_id), 0);
    }
}
