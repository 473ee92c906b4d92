use log::debug;
use puzzle_msg::{Post, PostContent, PostId};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};
use tokio::sync::watch;

/// One consistent view of the feed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeedSnapshot {
    /// Newest first.
    pub posts: Vec<Post>,
    /// Counts authoritative replacements; optimistic patches leave it alone.
    pub generation: u64,
}

impl FeedSnapshot {
    pub fn get(&self, id: &PostId) -> Option<&Post> {
        self.posts.iter().find(|post| &post.id == id)
    }
}

/// Records what a patch overwrote so it can be undone.
#[derive(Clone, Debug)]
pub struct PatchTicket {
    post_id: PostId,
    previous: Option<(usize, Post)>,
    generation: u64,
    sequence: u64,
    /// The patch on the same post this one was stacked on.
    superseded: Option<u64>,
}

impl PatchTicket {
    pub fn post_id(&self) -> &PostId {
        &self.post_id
    }
}

/// Mirror of the store's live post query.
///
/// Readers always get a whole [`FeedSnapshot`]: replacements and patches swap the snapshot
/// under the channel's lock, so old and new entries are never mixed. Once closed, every
/// write is ignored.
///
/// Only the newest patch on a post can be reverted; older tickets for that post are refused
/// so later patches are never lost.
pub struct FeedCache {
    snapshot: watch::Sender<Arc<FeedSnapshot>>,
    closed: AtomicBool,
    patches: Mutex<PatchLog>,
}

#[derive(Default)]
struct PatchLog {
    next: u64,
    /// Newest live patch per post since the last replacement.
    latest: HashMap<PostId, u64>,
}

impl Default for FeedCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedCache {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(FeedSnapshot::default()));
        Self {
            snapshot,
            closed: AtomicBool::new(false),
            patches: Mutex::new(PatchLog::default()),
        }
    }

    pub fn snapshot(&self) -> Arc<FeedSnapshot> {
        self.snapshot.borrow().clone()
    }

    /// Receives every snapshot published after this call.
    pub fn watch(&self) -> watch::Receiver<Arc<FeedSnapshot>> {
        self.snapshot.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("feed cache closed");
        }
    }

    /// Swaps in a full result set from the store.
    pub fn replace(&self, mut posts: Vec<Post>) -> Option<Arc<FeedSnapshot>> {
        if self.is_closed() {
            debug!("dropping push of {} posts into closed cache", posts.len());
            return None;
        }
        sort_newest_first(&mut posts);

        let mut replaced = None;
        self.snapshot.send_modify(|current| {
            let next = Arc::new(FeedSnapshot {
                posts,
                generation: current.generation + 1,
            });
            debug!(
                "feed replaced with {} posts, generation {}",
                next.posts.len(),
                next.generation
            );
            *current = next.clone();
            self.patch_log().latest.clear();
            replaced = Some(next);
        });
        replaced
    }

    /// Edits one cached post in place. `None` if the post is not cached.
    pub fn patch<F>(&self, id: &PostId, edit: F) -> Option<PatchTicket>
    where
        F: FnOnce(&mut PostContent),
    {
        self.write(|snapshot| {
            let index = snapshot.posts.iter().position(|post| &post.id == id)?;
            let previous = Some((index, snapshot.posts[index].clone()));
            edit(&mut snapshot.posts[index].content);
            Some(self.ticket(id, previous, snapshot.generation))
        })
    }

    /// Adds a post that the store has not pushed yet, keeping the order.
    pub fn insert(&self, post: Post) -> Option<PatchTicket> {
        self.write(|snapshot| {
            let previous = snapshot
                .posts
                .iter()
                .position(|existing| existing.id == post.id)
                .map(|index| (index, snapshot.posts.remove(index)));
            let ticket = self.ticket(&post.id, previous, snapshot.generation);
            let index = snapshot
                .posts
                .iter()
                .position(|existing| existing.content.created_at < post.content.created_at)
                .unwrap_or(snapshot.posts.len());
            snapshot.posts.insert(index, post);
            Some(ticket)
        })
    }

    pub fn remove(&self, id: &PostId) -> Option<PatchTicket> {
        self.write(|snapshot| {
            let index = snapshot.posts.iter().position(|post| &post.id == id)?;
            let removed = snapshot.posts.remove(index);
            Some(self.ticket(id, Some((index, removed)), snapshot.generation))
        })
    }

    /// Undoes a patch. Refused once a newer push has replaced the cache, or once a later
    /// patch touched the same post.
    pub fn revert(&self, ticket: PatchTicket) -> bool {
        self.write(|snapshot| {
            if snapshot.generation != ticket.generation {
                return None;
            }
            {
                let mut log = self.patch_log();
                if log.latest.get(&ticket.post_id) != Some(&ticket.sequence) {
                    debug!("{} was patched again, not reverting", ticket.post_id);
                    return None;
                }
                match ticket.superseded {
                    Some(sequence) => log.latest.insert(ticket.post_id.clone(), sequence),
                    None => log.latest.remove(&ticket.post_id),
                };
            }
            snapshot.posts.retain(|post| post.id != ticket.post_id);
            if let Some((index, post)) = ticket.previous {
                let index = index.min(snapshot.posts.len());
                snapshot.posts.insert(index, post);
            }
            Some(())
        })
        .is_some()
    }

    fn ticket(
        &self,
        id: &PostId,
        previous: Option<(usize, Post)>,
        generation: u64,
    ) -> PatchTicket {
        let mut log = self.patch_log();
        log.next += 1;
        let sequence = log.next;
        let superseded = log.latest.insert(id.clone(), sequence);
        PatchTicket {
            post_id: id.clone(),
            previous,
            generation,
            sequence,
            superseded,
        }
    }

    fn patch_log(&self) -> MutexGuard<'_, PatchLog> {
        self.patches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write<T, F>(&self, edit: F) -> Option<T>
    where
        F: FnOnce(&mut FeedSnapshot) -> Option<T>,
    {
        if self.is_closed() {
            debug!("ignoring patch on closed cache");
            return None;
        }
        let mut result = None;
        self.snapshot.send_if_modified(|current| {
            let mut next = FeedSnapshot::clone(current);
            result = edit(&mut next);
            if result.is_some() {
                *current = Arc::new(next);
            }
            result.is_some()
        });
        result
    }
}

fn sort_newest_first(posts: &mut [Post]) {
    posts.sort_by(|a, b| b.content.created_at.cmp(&a.content.created_at));
}
