use futures::{
    future::{join_all, BoxFuture, Shared},
    FutureExt,
};
use log::{debug, warn};
use puzzle_db::DocumentStore;
use puzzle_msg::UserProfile;
use puzzle_ref::{Collection, UserId};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use crate::Error;

type Fetch = Shared<BoxFuture<'static, Result<Option<UserProfile>, Arc<Error>>>>;

#[derive(Default)]
struct Entries {
    /// `None` records a profile the store does not have.
    resolved: HashMap<UserId, Option<UserProfile>>,
    in_flight: HashMap<UserId, (u64, Fetch)>,
}

/// Memoized profile lookups.
///
/// Concurrent misses for one user share a single store read. Found and not-found results
/// are both remembered; failed reads are not, so the next call tries again.
pub struct ProfileResolver {
    store: Arc<dyn DocumentStore>,
    entries: Mutex<Entries>,
    next_fetch: AtomicU64,
}

impl ProfileResolver {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            entries: Mutex::new(Entries::default()),
            next_fetch: AtomicU64::new(0),
        }
    }

    pub async fn resolve(&self, user_id: &UserId) -> Result<Option<UserProfile>, Error> {
        let (token, fetch) = {
            let mut entries = self.lock();
            if let Some(profile) = entries.resolved.get(user_id) {
                return Ok(profile.clone());
            }
            match entries.in_flight.get(user_id) {
                Some(in_flight) => in_flight.clone(),
                None => {
                    let token = self.next_fetch.fetch_add(1, Ordering::Relaxed);
                    let fetch = fetch_profile(self.store.clone(), user_id.clone())
                        .boxed()
                        .shared();
                    entries
                        .in_flight
                        .insert(user_id.clone(), (token, fetch.clone()));
                    (token, fetch)
                }
            }
        };

        let result = fetch.await;

        let mut entries = self.lock();
        let current = matches!(entries.in_flight.get(user_id), Some((t, _)) if *t == token);
        if current {
            entries.in_flight.remove(user_id);
            if let Ok(profile) = &result {
                entries.resolved.insert(user_id.clone(), profile.clone());
            }
        }
        result.map_err(Error::ProfileFetch)
    }

    /// Returns what is already known without touching the store.
    pub fn cached(&self, user_id: &UserId) -> Option<Option<UserProfile>> {
        self.lock().resolved.get(user_id).cloned()
    }

    /// Resolves every id, logging failures instead of returning them.
    pub async fn prefetch<I>(&self, user_ids: I)
    where
        I: IntoIterator<Item = UserId>,
    {
        let lookups = user_ids.into_iter().map(|user_id| async move {
            if let Err(err) = self.resolve(&user_id).await {
                warn!("failed to fetch profile for {}: {}", user_id, err);
            }
        });
        join_all(lookups).await;
    }

    /// Forgets a profile after it was changed locally.
    pub fn invalidate(&self, user_id: &UserId) {
        let mut entries = self.lock();
        entries.resolved.remove(user_id);
        entries.in_flight.remove(user_id);
        debug!("profile cache dropped {}", user_id);
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn fetch_profile(
    store: Arc<dyn DocumentStore>,
    user_id: UserId,
) -> Result<Option<UserProfile>, Arc<Error>> {
    debug!("fetching profile {}", user_id);
    let doc = store
        .get(Collection::Users.as_str(), user_id.as_str())
        .await
        .map_err(|err| Arc::new(Error::from(err)))?;

    match doc {
        Some(doc) => UserProfile::from_fields(&doc.id, doc.fields)
            .map(Some)
            .map_err(|err| Arc::new(Error::from(err))),
        None => {
            warn!("no profile found for {}", user_id);
            Ok(None)
        }
    }
}
