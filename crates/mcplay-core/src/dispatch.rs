//! Command dispatcher.
//!
//! Merges keyboard input, remote commands and subprocess events into one
//! FIFO queue consumed by the controller thread. Each source holds an
//! [`Inbox`]; envelopes carry the source tag and a sequence number used in
//! diagnostics.

use std::sync::atomic::{ AtomicU64, Ordering };
use std::sync::mpsc::{ self, Receiver, Sender };
pub use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use crate::command::Command;
use crate::supervisor::ProcessEvent;


/// Where an envelope came from.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Source {
    Keyboard,
    Remote,
    Subprocess,
}


/// Payload of an envelope.
#[derive( Debug, Clone, PartialEq )]
pub enum Event {
    Command( Command ),
    Process( ProcessEvent ),
}


/// A queued event.
#[derive( Debug, Clone, PartialEq )]
pub struct Envelope {
    pub seq: u64,
    pub source: Source,
    pub event: Event,
}


/// Sending half held by one input source.
#[derive( Debug, Clone )]
pub struct Inbox {
    source: Source,
    tx: Sender<Envelope>,
    seq: Arc<AtomicU64>,
}


impl Inbox {
    /// Queues a command.
    ///
    /// @returns false once the controller has gone away
    pub fn command( &self, command: Command ) -> bool {
        self.send( Event::Command( command ) )
    }


    /// Queues a subprocess event.
    pub fn process( &self, event: ProcessEvent ) -> bool {
        self.send( Event::Process( event ) )
    }


    fn send( &self, event: Event ) -> bool {
        let seq = self.seq.fetch_add( 1, Ordering::Relaxed );
        self.tx.send( Envelope { seq, source: self.source, event } ).is_ok()
    }
}


/// Owns the queue and hands out inboxes.
#[derive( Debug )]
pub struct Dispatcher {
    tx: Sender<Envelope>,
    rx: Receiver<Envelope>,
    seq: Arc<AtomicU64>,
}


impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}


impl Dispatcher {
    pub fn new() -> Self {
        let ( tx, rx ) = mpsc::channel();
        Self { tx, rx, seq: Arc::new( AtomicU64::new( 0 ) ) }
    }


    /// Creates an inbox for `source`.
    pub fn inbox( &self, source: Source ) -> Inbox {
        Inbox {
            source,
            tx: self.tx.clone(),
            seq: Arc::clone( &self.seq ),
        }
    }


    /// Splits into the receiving half. The dispatcher's own sender is
    /// dropped so the queue closes once every inbox is gone.
    pub fn into_receiver( self ) -> Queue {
        Queue { rx: self.rx }
    }
}


/// Receiving half consumed by the controller.
#[derive( Debug )]
pub struct Queue {
    rx: Receiver<Envelope>,
}


impl Queue {
    /// Blocks for the next envelope; `None` once every inbox is dropped.
    pub fn recv( &self ) -> Option<Envelope> {
        self.rx.recv().ok()
    }


    /// Waits up to `timeout` for the next envelope.
    pub fn recv_timeout( &self, timeout: Duration ) -> Result<Envelope, RecvTimeoutError> {
        self.rx.recv_timeout( timeout )
    }


    /// Takes an envelope if one is waiting.
    pub fn try_recv( &self ) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::supervisor::Handle;


    #[test]
    fn test_fifo_across_sources() {
        let dispatcher = Dispatcher::new();
        let keys = dispatcher.inbox( Source::Keyboard );
        let remote = dispatcher.inbox( Source::Remote );
        let procs = dispatcher.inbox( Source::Subprocess );
        let queue = dispatcher.into_receiver();

        assert!( keys.command( Command::Play ) );
        assert!( procs.process( ProcessEvent::Ready( Handle( 1 ) ) ) );
        assert!( remote.command( Command::Next ) );

        let first = queue.recv().unwrap();
        let second = queue.recv().unwrap();
        let third = queue.recv().unwrap();

        assert_eq!( first.source, Source::Keyboard );
        assert_eq!( second.event, Event::Process( ProcessEvent::Ready( Handle( 1 ) ) ) );
        assert_eq!( third.event, Event::Command( Command::Next ) );
        assert!( first.seq < second.seq && second.seq < third.seq );
        assert!( queue.try_recv().is_none() );
    }


    #[test]
    fn test_queue_closes_when_inboxes_drop() {
        let dispatcher = Dispatcher::new();
        let keys = dispatcher.inbox( Source::Keyboard );
        let queue = dispatcher.into_receiver();

        assert_eq!( queue.recv_timeout( Duration::from_millis( 10 ) ), Err( RecvTimeoutError::Timeout ) );
        drop( keys );
        assert!( queue.recv().is_none() );
        assert_eq!(
            queue.recv_timeout( Duration::from_millis( 10 ) ),
            Err( RecvTimeoutError::Disconnected )
        );
    }


    #[test]
    fn test_send_after_close_reports_failure() {
        let dispatcher = Dispatcher::new();
        let keys = dispatcher.inbox( Source::Keyboard );
        drop( dispatcher.into_receiver() );
        assert!( !keys.command( Command::Quit ) );
    }
}
