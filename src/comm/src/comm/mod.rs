pub mod dispatch;

use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use thiserror::Error;

use crate::buffer::WordBuffer;
use crate::colors::ColorCodec;
use crate::config::CommConfig;
use crate::counters::{TrafficCounters, TrafficSnapshot};
use crate::message::{Command, Job, ProtocolError, Token, COMMAND_WORDS};
use crate::transport::{Transport, TransportError, COMMAND_TAG, DATA_TAG};

use dispatch::DispatchEngine;

/// Message kinds a listener can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerKind {
    Token,
    Job,
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerKind::Token => write!(f, "token"),
            ListenerKind::Job => write!(f, "job"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CommError {
    #[error("rank {0} cannot send a message to itself")]
    SelfSend(usize),
    #[error("replacing already present {1} listener on rank {0}")]
    ListenerAlreadyRegistered(usize, ListenerKind),
    #[error("removing non existent {1} listener on rank {0}")]
    ListenerNotRegistered(usize, ListenerKind),
    #[error("no {1} listener registered on rank {0} when a message arrived")]
    NoListener(usize, ListenerKind),
    #[error("rank {0} closed while a listener is still registered")]
    StillListening(usize),
    #[error("a communicator needs at least two ranks, got {0}")]
    ClusterTooSmall(usize),
    #[error("failed to spawn dispatch thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("dispatch thread panicked")]
    DispatchPanicked,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

pub type TokenListener = Arc<dyn Fn(Token) + Send + Sync>;
pub type JobListener<C> = Arc<dyn Fn(Job<C>) + Send + Sync>;

/// At-most-one callback per message kind. Slots are mutated only inside a
/// critical section; the dispatch loop clones the current callback out of
/// the slot, so registration never blocks behind a running listener.
pub(crate) struct ListenerTable<C> {
    token: Mutex<Option<TokenListener>>,
    job: Mutex<Option<JobListener<C>>>,
}

impl<C> ListenerTable<C> {
    fn new(token: Option<TokenListener>, job: Option<JobListener<C>>) -> Self {
        ListenerTable {
            token: Mutex::new(token),
            job: Mutex::new(job),
        }
    }

    fn install_token(&self, rank: usize, listener: TokenListener) -> Result<(), CommError> {
        let mut slot = self.token.lock().unwrap();
        if slot.is_some() {
            return Err(CommError::ListenerAlreadyRegistered(
                rank,
                ListenerKind::Token,
            ));
        }
        *slot = Some(listener);
        Ok(())
    }

    fn clear_token(&self, rank: usize) -> Result<(), CommError> {
        let mut slot = self.token.lock().unwrap();
        if slot.is_none() {
            return Err(CommError::ListenerNotRegistered(rank, ListenerKind::Token));
        }
        *slot = None;
        Ok(())
    }

    fn install_job(&self, rank: usize, listener: JobListener<C>) -> Result<(), CommError> {
        let mut slot = self.job.lock().unwrap();
        if slot.is_some() {
            return Err(CommError::ListenerAlreadyRegistered(rank, ListenerKind::Job));
        }
        *slot = Some(listener);
        Ok(())
    }

    fn clear_job(&self, rank: usize) -> Result<(), CommError> {
        let mut slot = self.job.lock().unwrap();
        if slot.is_none() {
            return Err(CommError::ListenerNotRegistered(rank, ListenerKind::Job));
        }
        *slot = None;
        Ok(())
    }

    pub(crate) fn current_token(&self) -> Option<TokenListener> {
        self.token.lock().unwrap().clone()
    }

    pub(crate) fn current_job(&self) -> Option<JobListener<C>> {
        self.job.lock().unwrap().clone()
    }

    fn any_registered(&self) -> bool {
        self.token.lock().unwrap().is_some() || self.job.lock().unwrap().is_some()
    }
}

pub(crate) struct Shared<X: ColorCodec> {
    pub(crate) rank: usize,
    pub(crate) size: usize,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) codec: X,
    pub(crate) listeners: ListenerTable<X::Colors>,
    pub(crate) counters: TrafficCounters,
}

/// Outbound message accepted by [`Communicator::send`].
#[derive(Clone, Debug)]
pub enum Message<C> {
    Token(Token),
    Job(Job<C>),
}

struct SendState {
    command: [i32; COMMAND_WORDS],
    data: WordBuffer,
}

/// Cloneable sending side of a communicator. Listeners that forward tokens
/// or jobs to peers capture one of these.
pub struct SendHandle<X: ColorCodec> {
    shared: Arc<Shared<X>>,
    state: Arc<Mutex<SendState>>,
}

impl<X: ColorCodec> Clone for SendHandle<X> {
    fn clone(&self) -> Self {
        SendHandle {
            shared: Arc::clone(&self.shared),
            state: Arc::clone(&self.state),
        }
    }
}

impl<X: ColorCodec> SendHandle<X> {
    pub fn rank(&self) -> usize {
        self.shared.rank
    }

    pub fn size(&self) -> usize {
        self.shared.size
    }

    pub fn counters(&self) -> TrafficSnapshot {
        self.shared.counters.snapshot()
    }

    /// Push a message to `dest`. A job is two ordered transmissions, the
    /// command record then the payload; one lock spans both so concurrent
    /// senders on this node cannot interleave them.
    pub fn send(&self, dest: usize, message: Message<X::Colors>) -> Result<(), CommError> {
        let shared = &self.shared;
        if dest == shared.rank {
            return Err(CommError::SelfSend(shared.rank));
        }
        let mut state = self.state.lock().unwrap();
        let state = &mut *state;
        match message {
            Message::Token(token) => {
                Command::Token {
                    sender: shared.rank,
                    token,
                }
                .encode(&mut state.command);
                log::trace!("rank {} sending token to {}", shared.rank, dest);
                shared.transport.send_ints(&state.command, dest, COMMAND_TAG)?;
                shared.counters.record_send(COMMAND_WORDS);
            }
            Message::Job(job) => {
                let payload_words = shared.codec.word_len(&job.colors);
                Command::Job {
                    sender: shared.rank,
                    source: job.source,
                    target: job.target,
                    payload_words,
                }
                .encode(&mut state.command);
                log::trace!(
                    "rank {} sending job header to {} ({} payload words)",
                    shared.rank,
                    dest,
                    payload_words
                );
                shared.transport.send_ints(&state.command, dest, COMMAND_TAG)?;
                shared.counters.record_send(COMMAND_WORDS);

                state.data.ensure_capacity(payload_words);
                shared
                    .codec
                    .encode(&job.colors, state.data.slice_mut(payload_words));
                log::trace!("rank {} sending job payload to {}", shared.rank, dest);
                shared
                    .transport
                    .send_words(state.data.slice(payload_words), dest, DATA_TAG)?;
                shared.counters.record_send(payload_words);
            }
        }
        Ok(())
    }

    pub fn send_token(&self, dest: usize, token: Token) -> Result<(), CommError> {
        self.send(dest, Message::Token(token))
    }

    pub fn send_job(&self, dest: usize, job: Job<X::Colors>) -> Result<(), CommError> {
        self.send(dest, Message::Job(job))
    }
}

/// One node's endpoint of the cluster.
///
/// Owns the background dispatch thread that receives commands and invokes
/// the registered listeners, strictly one message at a time. Dropping a
/// communicator without [`close`](Communicator::close) leaks the dispatch
/// thread, which stays blocked on its receive until the process exits; the
/// ring handshake is the only way to stop it.
pub struct Communicator<X: ColorCodec> {
    handle: SendHandle<X>,
    dispatch: Option<JoinHandle<Result<(), CommError>>>,
}

impl<X: ColorCodec> Communicator<X> {
    /// Start a communicator with no listeners registered.
    ///
    /// Peers must not send until listeners are in place; when the transport
    /// may already carry traffic, use
    /// [`start_with_listeners`](Communicator::start_with_listeners) so no
    /// window exists in which a message finds no consumer.
    pub fn start(
        transport: Arc<dyn Transport>,
        codec: X,
        config: &CommConfig,
    ) -> Result<Self, CommError> {
        Self::start_with_listeners(transport, codec, config, None, None)
    }

    pub fn start_with_listeners(
        transport: Arc<dyn Transport>,
        codec: X,
        config: &CommConfig,
        token_listener: Option<TokenListener>,
        job_listener: Option<JobListener<X::Colors>>,
    ) -> Result<Self, CommError> {
        let size = transport.size();
        if size < 2 {
            return Err(CommError::ClusterTooSmall(size));
        }
        let rank = transport.rank();
        let shared = Arc::new(Shared {
            rank,
            size,
            transport,
            codec,
            listeners: ListenerTable::new(token_listener, job_listener),
            counters: TrafficCounters::default(),
        });

        let mut engine = DispatchEngine::new(Arc::clone(&shared), config);
        let dispatch = std::thread::Builder::new()
            .name(format!("pargraph-dispatch-{}", rank))
            .spawn(move || {
                let result = engine.mainloop();
                if let Err(err) = &result {
                    log::error!("rank {} dispatch loop stopped on fatal error: {}", rank, err);
                }
                result
            })
            .map_err(CommError::Spawn)?;

        Ok(Communicator {
            handle: SendHandle {
                shared,
                state: Arc::new(Mutex::new(SendState {
                    command: [0; COMMAND_WORDS],
                    data: WordBuffer::with_capacity(config.initial_data_capacity),
                })),
            },
            dispatch: Some(dispatch),
        })
    }

    pub fn rank(&self) -> usize {
        self.handle.rank()
    }

    pub fn size(&self) -> usize {
        self.handle.size()
    }

    pub fn counters(&self) -> TrafficSnapshot {
        self.handle.counters()
    }

    /// A cloneable sending handle for listeners and worker threads.
    pub fn sender(&self) -> SendHandle<X> {
        self.handle.clone()
    }

    pub fn send(&self, dest: usize, message: Message<X::Colors>) -> Result<(), CommError> {
        self.handle.send(dest, message)
    }

    pub fn send_token(&self, dest: usize, token: Token) -> Result<(), CommError> {
        self.handle.send_token(dest, token)
    }

    pub fn send_job(&self, dest: usize, job: Job<X::Colors>) -> Result<(), CommError> {
        self.handle.send_job(dest, job)
    }

    pub fn add_token_listener<F>(&self, listener: F) -> Result<(), CommError>
    where
        F: Fn(Token) + Send + Sync + 'static,
    {
        log::debug!("rank {} add token listener", self.rank());
        self.handle
            .shared
            .listeners
            .install_token(self.rank(), Arc::new(listener))
    }

    pub fn remove_token_listener(&self) -> Result<(), CommError> {
        log::debug!("rank {} remove token listener", self.rank());
        self.handle.shared.listeners.clear_token(self.rank())
    }

    pub fn add_job_listener<F>(&self, listener: F) -> Result<(), CommError>
    where
        F: Fn(Job<X::Colors>) + Send + Sync + 'static,
    {
        log::debug!("rank {} add job listener", self.rank());
        self.handle
            .shared
            .listeners
            .install_job(self.rank(), Arc::new(listener))
    }

    pub fn remove_job_listener(&self) -> Result<(), CommError> {
        log::debug!("rank {} remove job listener", self.rank());
        self.handle.shared.listeners.clear_job(self.rank())
    }

    /// Shut down this node's slice of the ring.
    ///
    /// Requires that both listener slots are empty, i.e. the external
    /// termination detection has certified the whole cluster idle. The
    /// terminate record goes to the ring successor `(rank + 1) % size`,
    /// not to this node: the transport cannot address self. Every node
    /// closing this way delivers exactly one terminate to every dispatch
    /// loop, so the join below cannot hang.
    pub fn close(&mut self) -> Result<(), CommError> {
        let shared = &self.handle.shared;
        if shared.listeners.any_registered() {
            return Err(CommError::StillListening(shared.rank));
        }
        let dispatch = match self.dispatch.take() {
            Some(handle) => handle,
            // already closed
            None => return Ok(()),
        };
        let successor = (shared.rank + 1) % shared.size;
        {
            let mut state = self.handle.state.lock().unwrap();
            Command::Terminate {
                sender: shared.rank,
            }
            .encode(&mut state.command);
            log::trace!(
                "rank {} sending terminate to ring successor {}",
                shared.rank,
                successor
            );
            shared
                .transport
                .send_ints(&state.command, successor, COMMAND_TAG)?;
        }
        log::trace!("rank {} waiting for own dispatch loop to stop", shared.rank);
        dispatch.join().map_err(|_| CommError::DispatchPanicked)?
    }
}
