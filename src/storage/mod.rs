// Copyright 2025 Flatbase Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Storage layer: configuration, file metadata, locking, codecs, and the
//! transaction that ties them together

pub mod codec;
pub mod config;
pub mod file_info;
pub mod file_lock;
pub mod transaction;

pub use config::{
    Environment, ExportOptions, Flags, Format, ImportOptions, JsonEscapeType, LineBreak,
    TextEncoding,
};
pub use file_info::{FileInfo, FileInfoHandle};
pub use file_lock::{FileLock, LockMode};
pub use transaction::Transaction;
