use std::sync::Arc;

use crate::buffer::WordBuffer;
use crate::colors::ColorCodec;
use crate::config::CommConfig;
use crate::message::{Command, Job, COMMAND_WORDS};
use crate::transport::{Source, COMMAND_TAG, DATA_TAG};

use super::{CommError, ListenerKind, Shared};

/// Background worker owning the receive side of one node.
///
/// One blocking command receive at a time; every message is fully handled
/// (payload received, listener returned) before the next command is taken
/// off the wire, so listener invocations never overlap on a node.
pub(crate) struct DispatchEngine<X: ColorCodec> {
    shared: Arc<Shared<X>>,
    command: [i32; COMMAND_WORDS],
    data: WordBuffer,
}

impl<X: ColorCodec> DispatchEngine<X> {
    pub(crate) fn new(shared: Arc<Shared<X>>, config: &CommConfig) -> Self {
        DispatchEngine {
            shared,
            command: [0; COMMAND_WORDS],
            data: WordBuffer::with_capacity(config.initial_data_capacity),
        }
    }

    pub(crate) fn mainloop(&mut self) -> Result<(), CommError> {
        let rank = self.shared.rank;
        loop {
            log::trace!("rank {} waiting for command", rank);
            self.shared
                .transport
                .recv_ints(&mut self.command, Source::Any, COMMAND_TAG)?;
            self.shared.counters.record_receive(COMMAND_WORDS);

            match Command::decode(&self.command)? {
                Command::Terminate { sender } => {
                    log::trace!("rank {} received terminate from {}", rank, sender);
                    return Ok(());
                }
                Command::Token { sender, token } => {
                    log::trace!("rank {} received token from {}", rank, sender);
                    let listener = self
                        .shared
                        .listeners
                        .current_token()
                        .ok_or(CommError::NoListener(rank, ListenerKind::Token))?;
                    listener(token);
                    log::trace!("rank {} token listener finished", rank);
                }
                Command::Job {
                    sender,
                    source,
                    target,
                    payload_words,
                } => {
                    log::trace!(
                        "rank {} received job header from {} ({} payload words)",
                        rank,
                        sender,
                        payload_words
                    );
                    let colors = self.receive_colors(sender, payload_words)?;
                    let listener = self
                        .shared
                        .listeners
                        .current_job()
                        .ok_or(CommError::NoListener(rank, ListenerKind::Job))?;
                    listener(Job {
                        source,
                        target,
                        colors,
                    });
                    log::trace!("rank {} job listener finished", rank);
                }
            }
        }
    }

    // The data receive is qualified by the sender named in the command so
    // payloads from concurrently sending peers cannot cross.
    fn receive_colors(
        &mut self,
        sender: usize,
        payload_words: usize,
    ) -> Result<X::Colors, CommError> {
        self.data.ensure_capacity(payload_words);
        log::trace!(
            "rank {} waiting for {} payload words from {}",
            self.shared.rank,
            payload_words,
            sender
        );
        self.shared.transport.recv_words(
            self.data.slice_mut(payload_words),
            Source::Rank(sender),
            DATA_TAG,
        )?;
        self.shared.counters.record_receive(payload_words);
        let colors = self.shared.codec.decode(self.data.slice(payload_words))?;
        Ok(colors)
    }
}
