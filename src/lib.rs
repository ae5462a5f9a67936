pub mod datatypes;
pub mod record;
pub mod group;
pub mod subrecord;
pub mod utils;
pub mod game;
pub mod arena;
pub mod handles;
pub mod formid;
pub mod field;
pub mod codec;
pub mod accessor;
pub mod store;
pub mod load_order;
pub mod conflict;
pub mod references;
pub mod diagnostics;
pub mod plugin;
pub mod io;
pub mod collection;
pub mod registry;

// 重新导出主要结构
pub use accessor::FieldAttributes;
pub use codec::{RecordCodec, SchemaCodec};
pub use collection::{Collection, CreateFlags, Progress, ProgressCallback, RecordLookup, SaveFlags};
pub use datatypes::{RecordFlags, RecordType};
pub use field::{FieldKind, FieldPath, FieldTree, FieldValue};
pub use formid::{FormId, LongFormId, MgefCode};
pub use game::Game;
pub use handles::{CollectionId, PluginId, RecordId};
pub use io::{FsIo, MemoryIo, PluginIo};
pub use plugin::{Plugin, PluginFlags, PluginHeader, PluginStats};
pub use references::{ReferenceScope, ReferenceUpdate};
pub use registry::Registry;
pub use store::{Identity, Record};
pub use utils::{EspError, Result};

// 常量定义
pub const SUPPORTED_EXTENSIONS: &[&str] = &["esp", "esm", "esl"];
