//! patchview - diff/hunk model and incremental syntax tokenization for code
//! review surfaces
//!
//! Parses unified diffs into hunks, lays them out in split and unified row
//! tables, accepts/rejects hunks, anchors annotations to rows, and tokenizes
//! content on a worker pool. Painting the rows is left to the host.
//!
//! Uses Elm Architecture (Session/Message/Update) for the host-facing handle.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::too_many_lines)]

pub mod config;
pub mod diff;
pub mod error;
pub mod message;
pub mod scheduler;
pub mod session;
pub mod stream;
pub mod syntax;
pub mod text;
pub mod update;
pub mod view;

pub use config::{PatchviewConfig, load_config};
pub use diff::{FileHunkSet, Hunk, HunkDecision, ParsedPatch, parse_patch, resolve_hunk};
pub use error::{MutationError, SchedulerError, StreamError, TokenizeError};
pub use message::Message;
pub use scheduler::{ScheduledStream, TaskScheduler, TaskTicket, WorkerTaskStats};
pub use session::{RenderTarget, Session};
pub use stream::StreamRenderer;
pub use syntax::{SyntectFactory, Token};
pub use update::update;
pub use view::{DiffLayout, LineAnnotation, ViewMode};
