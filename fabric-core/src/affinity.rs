//! Thread-affine caching of the reusable [`Message`] and [`WorkContext`].
//!
//! Every execution thread owns exactly one reusable message and one work context. Ownership
//! follows the thread: a worker runs one logical request at a time, so the cached instances are
//! never touched concurrently and need no locking.
//!
//! Two storage strategies exist and behave identically to callers:
//!
//! - [`AffinityCache::worker`]: the state lives in a slot owned by a managed worker thread and is
//!   handed to every job that worker runs, avoiding any lookup.
//! - [`AffinityCache::thread_local`]: for threads the runtime does not manage, the state lives in a
//!   `thread_local!` slot.
//!
//! Entry points that receive a new external request must call [`AffinityCache::begin_request`]
//! before building their message; it clears whatever the previous request left on the thread.
use std::{cell::RefCell, rc::Rc};

use crate::{context::WorkContext, message::Message};

#[derive(Debug, Default)]
struct ThreadState {
    message: Option<Message>,
    work_context: Option<WorkContext>,
}

impl ThreadState {
    fn reset(&mut self) {
        if let Some(msg) = self.message.as_mut() {
            msg.reset();
        }
        if let Some(ctx) = self.work_context.as_mut() {
            ctx.reset();
        }
    }
}

thread_local! {
    static THREAD_STATE: RefCell<ThreadState> = RefCell::new(ThreadState::default());
}

/// Handle to the calling thread's cached message and work context.
///
/// The closures given to the `with_*` accessors must not call back into the same cache.
#[derive(Debug, Clone)]
pub struct AffinityCache(Storage);

#[derive(Debug, Clone)]
enum Storage {
    Worker(Rc<RefCell<ThreadState>>),
    ThreadLocal,
}

impl AffinityCache {
    /// Slot owned by a managed worker thread.
    pub fn worker() -> Self {
        AffinityCache(Storage::Worker(Rc::new(RefCell::new(ThreadState::default()))))
    }

    /// Slot kept in thread-local storage.
    pub const fn thread_local() -> Self {
        AffinityCache(Storage::ThreadLocal)
    }

    pub fn is_worker(&self) -> bool {
        matches!(self.0, Storage::Worker(_))
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ThreadState) -> R) -> R {
        match &self.0 {
            Storage::Worker(state) => f(&mut state.borrow_mut()),
            Storage::ThreadLocal => THREAD_STATE.with(|state| f(&mut state.borrow_mut())),
        }
    }

    /// Runs `f` on the thread's message, creating it on first use.
    pub fn with_message<R>(&self, f: impl FnOnce(&mut Message) -> R) -> R {
        self.with_state(|s| f(s.message.get_or_insert_with(Message::new)))
    }

    /// Takes the thread's message for a new request, cleared of any previous state.
    ///
    /// Hand it back with [`AffinityCache::recycle_message`] once the request is done.
    pub fn get_and_reset_message(&self) -> Message {
        self.with_state(|s| {
            let mut msg = s.message.take().unwrap_or_default();
            msg.reset();
            msg
        })
    }

    pub fn recycle_message(&self, mut msg: Message) {
        msg.reset();
        self.with_state(|s| s.message = Some(msg));
    }

    /// Runs `f` on the thread's work context, creating it on first use.
    pub fn with_work_context<R>(&self, f: impl FnOnce(&mut WorkContext) -> R) -> R {
        self.with_state(|s| f(s.work_context.get_or_insert_with(WorkContext::new)))
    }

    /// Clears the thread's work context and returns a copy of the clean state.
    pub fn get_and_reset_work_context(&self) -> WorkContext {
        self.with_work_context(|ctx| {
            ctx.reset();
            ctx.clone()
        })
    }

    /// Replaces the thread's work context, returning the previous one.
    pub fn install_work_context(&self, ctx: WorkContext) -> Option<WorkContext> {
        self.with_state(|s| s.work_context.replace(ctx))
    }

    /// Marks the start of a new external request on this thread.
    ///
    /// Both cached instances are reset now, and the work context is reset again when the
    /// returned scope is dropped.
    pub fn begin_request(&self) -> RequestScope<'_> {
        self.with_state(ThreadState::reset);
        RequestScope { cache: self }
    }
}

/// A request in flight on the current thread. See [`AffinityCache::begin_request`].
#[derive(Debug)]
pub struct RequestScope<'c> {
    cache: &'c AffinityCache,
}

impl RequestScope<'_> {
    pub fn cache(&self) -> &AffinityCache {
        self.cache
    }

    /// A clean message with a copy of the thread's (clean) work context attached.
    pub fn message(&self) -> Message {
        let mut msg = self.cache.get_and_reset_message();
        msg.set_work_context(self.cache.with_work_context(|ctx| ctx.clone()));
        msg
    }

    pub fn finish(self, msg: Message) {
        self.cache.recycle_message(msg);
    }
}

impl Drop for RequestScope<'_> {
    fn drop(&mut self) {
        self.cache.with_work_context(WorkContext::reset);
    }
}
