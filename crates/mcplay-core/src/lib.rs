//! mcplay core - playback control engine
//!
//! This crate provides the entry store for the filelist and playlist,
//! supervision of an external player process, the playback state machine
//! and the remote control socket.

use std::sync::{ Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard };

pub mod command;
pub mod controller;
pub mod dispatch;
pub mod driver;
pub mod entry;
pub mod filelist;
pub mod mode;
pub mod playlist;
pub mod remote;
pub mod store;
pub mod supervisor;
pub mod tags;

pub use command::{ Command, CommandError, SeekTarget, VolumeChange };
pub use controller::{ ControlError, Controller, Flow, Message, PlayClock, PlaybackState, Status };
pub use dispatch::{ Dispatcher, Envelope, Event, Inbox, Queue, Source };
pub use driver::{ Control, PlayerDriver };
pub use entry::{ Entry, EntryKind };
pub use mode::{ PlaybackMode, Repeat, TrackSelector };
pub use remote::{ RemoteError, RemoteListener };
pub use store::{ EntryList, EntryStore, ListId, Motion, StoreError };
pub use supervisor::{ Delivery, Handle, ProcessEvent, ProcessStatus, Supervise, Supervisor, SupervisorError };
pub use tags::{ NoTags, SymphoniaTags, TagReader, Tags };


/// Locks a mutex, recovering the data if a holder panicked.
pub fn lock<T>( mutex: &Mutex<T> ) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else( PoisonError::into_inner )
}


/// Read-locks, recovering the data if a writer panicked.
pub fn read_lock<T>( lock: &RwLock<T> ) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else( PoisonError::into_inner )
}


/// Write-locks, recovering the data if a writer panicked.
pub fn write_lock<T>( lock: &RwLock<T> ) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else( PoisonError::into_inner )
}
