//! Wire types shared with other processes.
//!
//! `events` are published on the status broadcast channel and end up on the
//! display log; `commands` is the text protocol spoken on the command socket.

pub mod commands;
pub mod events;
