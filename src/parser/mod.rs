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

//! Parser contract
//!
//! The concrete SQL grammar lives in a front-end crate. The execution core
//! consumes the [`ast`] node types and, for statements that carry source
//! strings at run time (PREPARE, EXECUTE IMMEDIATE), calls back through
//! [`StatementParser`].

pub mod ast;

use crate::core::Result;

/// Run-time parsing seam for PREPARE and EXECUTE IMMEDIATE
pub trait StatementParser: Send + Sync {
    /// Parse a source string into a statement list
    fn parse(&self, source: &str) -> Result<Vec<ast::Statement>>;
}
