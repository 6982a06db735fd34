//! Role Mailbox
//!
//! Runs a role as a single sequential actor: one tokio task drains an ordered
//! inbox and hands each message to the role, one at a time. Timer firings and
//! RPC completions are posted back into the same inbox, so they never overlap
//! a running handler.
//!
//! External handles (`ActorRef`) keep the inbox open. The role's own
//! `Mailbox` holds only a weak sender: once every `ActorRef` is dropped the
//! actor stops and any pending timers or completions are discarded.

use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A role driven by [`spawn_actor`].
pub trait Actor: Send + 'static {
    type Message: Send + 'static;

    fn name(&self) -> &'static str;

    fn handle(&mut self, message: Self::Message, mailbox: &Mailbox<Self::Message>);
}

/// Strong, cloneable handle used by everything outside the actor.
pub struct ActorRef<M> {
    tx: mpsc::UnboundedSender<M>,
}

impl<M> Clone for ActorRef<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M: Send + 'static> ActorRef<M> {
    /// Enqueues a message. Returns `false` if the actor has stopped.
    pub fn send(&self, message: M) -> bool {
        self.tx.send(message).is_ok()
    }
}

/// The actor's view of its own inbox.
pub struct Mailbox<M> {
    tx: mpsc::WeakUnboundedSender<M>,
}

impl<M> Clone for Mailbox<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M: Send + 'static> Mailbox<M> {
    pub fn post(&self, message: M) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// One-shot timer: posts `message` after `delay`.
    pub fn post_after(&self, delay: Duration, message: M) {
        let mailbox = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            mailbox.post(message);
        });
    }

    /// Awaits `future` off the actor and posts its output as a new message.
    pub fn pipe<F, C>(&self, future: F, into_message: C)
    where
        F: Future + Send + 'static,
        F::Output: Send,
        C: FnOnce(F::Output) -> M + Send + 'static,
    {
        let mailbox = self.clone();
        tokio::spawn(async move {
            let output = future.await;
            mailbox.post(into_message(output));
        });
    }
}

/// Spawns `actor` on its own task and returns the handle to its inbox.
pub fn spawn_actor<A: Actor>(mut actor: A) -> (ActorRef<A::Message>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mailbox = Mailbox { tx: tx.downgrade() };

    let handle = tokio::spawn(async move {
        tracing::debug!("{} actor started", actor.name());

        while let Some(message) = rx.recv().await {
            actor.handle(message, &mailbox);
        }

        tracing::debug!("{} actor stopped", actor.name());
    });

    (ActorRef { tx }, handle)
}
