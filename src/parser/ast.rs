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

//! Abstract syntax tree consumed by the executor
//!
//! The grammar and the concrete parser live outside this crate; the types
//! here are the contract between that parser and the execution core. Every
//! node carries the source position of its first token so errors can point
//! at the offending text.

use std::fmt;

use crate::core::{ArithmeticOp, SourcePosition, Value};
pub use crate::core::ComparisonOp;

// ============================================================================
// Expressions
// ============================================================================

/// A column reference, optionally qualified with a view alias.
///
/// Field references are the keys of the per-record field-index cache, so
/// they derive `Eq + Hash` on their name parts (the position participates:
/// distinct occurrences resolve independently).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldReference {
    pub view: Option<String>,
    pub column: String,
    pub pos: SourcePosition,
}

impl FieldReference {
    pub fn new(view: Option<&str>, column: &str) -> FieldReference {
        FieldReference {
            view: view.map(str::to_string),
            column: column.to_string(),
            pos: SourcePosition::default(),
        }
    }
}

impl fmt::Display for FieldReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.view {
            Some(v) => write!(f, "{}.{}", v, self.column),
            None => write!(f, "{}", self.column),
        }
    }
}

/// Positional or named placeholder in a prepared statement
#[derive(Debug, Clone, PartialEq)]
pub enum PlaceholderLabel {
    Positional(usize),
    Named(String),
}

impl fmt::Display for PlaceholderLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaceholderLabel::Positional(_) => write!(f, "?"),
            PlaceholderLabel::Named(n) => write!(f, ":{}", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogicOp {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseBranch {
    pub condition: Expression,
    pub result: Expression,
}

/// Cursor state probes usable in expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorProbe {
    IsOpen,
    IsInRange,
    Count,
}

/// Source list of an IN predicate
#[derive(Debug, Clone, PartialEq)]
pub enum InListSource {
    Values(Vec<Expression>),
    Subquery(Box<SelectQuery>),
}

/// A parenthesized row of expressions (INSERT values, row comparisons)
#[derive(Debug, Clone, PartialEq)]
pub struct RowValue {
    pub values: Vec<Expression>,
    pub pos: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Field(FieldReference),
    Literal {
        value: Value,
        pos: SourcePosition,
    },
    Variable {
        name: String,
        pos: SourcePosition,
    },
    Placeholder {
        label: PlaceholderLabel,
        pos: SourcePosition,
    },
    Parentheses(Box<Expression>),
    Arithmetic {
        left: Box<Expression>,
        op: ArithmeticOp,
        right: Box<Expression>,
        pos: SourcePosition,
    },
    UnaryMinus {
        operand: Box<Expression>,
        pos: SourcePosition,
    },
    Concat {
        items: Vec<Expression>,
        pos: SourcePosition,
    },
    Comparison {
        left: Box<Expression>,
        op: ComparisonOp,
        right: Box<Expression>,
        pos: SourcePosition,
    },
    /// IS [NOT] NULL / TRUE / FALSE / UNKNOWN
    Is {
        left: Box<Expression>,
        right: Box<Expression>,
        negated: bool,
        pos: SourcePosition,
    },
    Between {
        subject: Box<Expression>,
        low: Box<Expression>,
        high: Box<Expression>,
        negated: bool,
        pos: SourcePosition,
    },
    Like {
        subject: Box<Expression>,
        pattern: Box<Expression>,
        negated: bool,
        pos: SourcePosition,
    },
    In {
        subject: Box<Expression>,
        source: InListSource,
        negated: bool,
        pos: SourcePosition,
    },
    Any {
        subject: Box<Expression>,
        op: ComparisonOp,
        query: Box<SelectQuery>,
        pos: SourcePosition,
    },
    All {
        subject: Box<Expression>,
        op: ComparisonOp,
        query: Box<SelectQuery>,
        pos: SourcePosition,
    },
    Exists {
        query: Box<SelectQuery>,
        pos: SourcePosition,
    },
    Logic {
        left: Option<Box<Expression>>,
        op: LogicOp,
        right: Box<Expression>,
        pos: SourcePosition,
    },
    Case {
        subject: Option<Box<Expression>>,
        branches: Vec<CaseBranch>,
        else_result: Option<Box<Expression>>,
        pos: SourcePosition,
    },
    Function {
        name: String,
        args: Vec<Expression>,
        distinct: bool,
        pos: SourcePosition,
    },
    ScalarSubquery {
        query: Box<SelectQuery>,
        pos: SourcePosition,
    },
    CursorStatus {
        cursor: String,
        probe: CursorProbe,
        pos: SourcePosition,
    },
    RowValueExpr(RowValue),
}

impl Expression {
    /// Convenience constructor for literals in hand-built trees
    pub fn literal(value: Value) -> Expression {
        Expression::Literal {
            value,
            pos: SourcePosition::default(),
        }
    }

    pub fn field(view: Option<&str>, column: &str) -> Expression {
        Expression::Field(FieldReference::new(view, column))
    }

    pub fn variable(name: &str) -> Expression {
        Expression::Variable {
            name: name.to_string(),
            pos: SourcePosition::default(),
        }
    }

    /// Position of the node's first token
    pub fn position(&self) -> SourcePosition {
        match self {
            Expression::Field(f) => f.pos,
            Expression::Literal { pos, .. }
            | Expression::Variable { pos, .. }
            | Expression::Placeholder { pos, .. }
            | Expression::Arithmetic { pos, .. }
            | Expression::UnaryMinus { pos, .. }
            | Expression::Concat { pos, .. }
            | Expression::Comparison { pos, .. }
            | Expression::Is { pos, .. }
            | Expression::Between { pos, .. }
            | Expression::Like { pos, .. }
            | Expression::In { pos, .. }
            | Expression::Any { pos, .. }
            | Expression::All { pos, .. }
            | Expression::Exists { pos, .. }
            | Expression::Logic { pos, .. }
            | Expression::Case { pos, .. }
            | Expression::Function { pos, .. }
            | Expression::ScalarSubquery { pos, .. }
            | Expression::CursorStatus { pos, .. } => *pos,
            Expression::Parentheses(inner) => inner.position(),
            Expression::RowValueExpr(rv) => rv.pos,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Field(fr) => write!(f, "{}", fr),
            Expression::Literal { value, .. } => match value {
                Value::String(s) => write!(f, "'{}'", s),
                Value::Null => write!(f, "NULL"),
                other => write!(f, "{}", other),
            },
            Expression::Variable { name, .. } => write!(f, "@{}", name),
            Expression::Placeholder { label, .. } => write!(f, "{}", label),
            Expression::Parentheses(inner) => write!(f, "({})", inner),
            Expression::Arithmetic { left, op, right, .. } => {
                write!(f, "{} {} {}", left, op, right)
            }
            Expression::UnaryMinus { operand, .. } => write!(f, "-{}", operand),
            Expression::Concat { items, .. } => {
                let parts: Vec<String> = items.iter().map(|e| e.to_string()).collect();
                write!(f, "{}", parts.join(" || "))
            }
            Expression::Comparison { left, op, right, .. } => {
                write!(f, "{} {} {}", left, op, right)
            }
            Expression::Is { left, right, negated, .. } => {
                write!(f, "{} IS {}{}", left, if *negated { "NOT " } else { "" }, right)
            }
            Expression::Between {
                subject,
                low,
                high,
                negated,
                ..
            } => write!(
                f,
                "{} {}BETWEEN {} AND {}",
                subject,
                if *negated { "NOT " } else { "" },
                low,
                high
            ),
            Expression::Like {
                subject,
                pattern,
                negated,
                ..
            } => write!(
                f,
                "{} {}LIKE {}",
                subject,
                if *negated { "NOT " } else { "" },
                pattern
            ),
            Expression::In { subject, negated, .. } => {
                write!(f, "{} {}IN (...)", subject, if *negated { "NOT " } else { "" })
            }
            Expression::Any { subject, op, .. } => write!(f, "{} {} ANY (...)", subject, op),
            Expression::All { subject, op, .. } => write!(f, "{} {} ALL (...)", subject, op),
            Expression::Exists { .. } => write!(f, "EXISTS (...)"),
            Expression::Logic { left, op, right, .. } => match (left, op) {
                (None, LogicOp::Not) => write!(f, "NOT {}", right),
                (Some(l), LogicOp::And) => write!(f, "{} AND {}", l, right),
                (Some(l), LogicOp::Or) => write!(f, "{} OR {}", l, right),
                _ => write!(f, "{}", right),
            },
            Expression::Case { .. } => write!(f, "CASE"),
            Expression::Function { name, args, distinct, .. } => {
                let parts: Vec<String> = args.iter().map(|e| e.to_string()).collect();
                write!(
                    f,
                    "{}({}{})",
                    name,
                    if *distinct { "DISTINCT " } else { "" },
                    parts.join(", ")
                )
            }
            Expression::ScalarSubquery { .. } => write!(f, "(SELECT)"),
            Expression::CursorStatus { cursor, probe, .. } => match probe {
                CursorProbe::IsOpen => write!(f, "CURSOR {} IS OPEN", cursor),
                CursorProbe::IsInRange => write!(f, "CURSOR {} IS IN RANGE", cursor),
                CursorProbe::Count => write!(f, "CURSOR {} COUNT", cursor),
            },
            Expression::RowValueExpr(rv) => {
                let parts: Vec<String> = rv.values.iter().map(|e| e.to_string()).collect();
                write!(f, "({})", parts.join(", "))
            }
        }
    }
}

// ============================================================================
// Queries
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub with: Option<WithClause>,
    pub entity: SelectEntity,
    pub order_by: Option<OrderByClause>,
    pub limit: Option<LimitClause>,
    pub offset: Option<OffsetClause>,
    pub pos: SourcePosition,
}

impl SelectQuery {
    /// A bare SELECT with no WITH / ORDER BY / LIMIT decoration
    pub fn from_clause(clause: SelectClause) -> SelectQuery {
        SelectQuery {
            with: None,
            entity: SelectEntity::Select(Box::new(clause)),
            order_by: None,
            limit: None,
            offset: None,
            pos: SourcePosition::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectEntity {
    Select(Box<SelectClause>),
    SetOperation {
        left: Box<SelectEntity>,
        op: SetOperator,
        all: bool,
        right: Box<SelectEntity>,
        pos: SourcePosition,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperator {
    Union,
    Intersect,
    Except,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectClause {
    pub distinct: bool,
    pub fields: Vec<SelectField>,
    pub from: Option<FromClause>,
    pub where_clause: Option<Expression>,
    pub group_by: Option<Vec<Expression>>,
    pub having: Option<Expression>,
    pub pos: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectField {
    Expression {
        expr: Expression,
        alias: Option<String>,
    },
    /// `*`
    Wildcard { pos: SourcePosition },
    /// `alias.*`
    ViewWildcard { view: String, pos: SourcePosition },
}

impl SelectField {
    pub fn expr(expr: Expression) -> SelectField {
        SelectField::Expression { expr, alias: None }
    }

    pub fn aliased(expr: Expression, alias: &str) -> SelectField {
        SelectField::Expression {
            expr,
            alias: Some(alias.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithClause {
    pub tables: Vec<InlineTableDef>,
    pub pos: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InlineTableDef {
    pub name: String,
    pub columns: Option<Vec<String>>,
    pub recursive: bool,
    pub query: SelectQuery,
    pub pos: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FromClause {
    pub tables: Vec<TableReference>,
    pub pos: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableReference {
    Object {
        object: TableObject,
        alias: Option<String>,
        pos: SourcePosition,
    },
    Join(Box<JoinClause>),
    Subquery {
        query: Box<SelectQuery>,
        alias: Option<String>,
        pos: SourcePosition,
    },
}

impl TableReference {
    pub fn table(name: &str) -> TableReference {
        TableReference::Object {
            object: TableObject::Identifier(name.to_string()),
            alias: None,
            pos: SourcePosition::default(),
        }
    }

    pub fn aliased_table(name: &str, alias: &str) -> TableReference {
        TableReference::Object {
            object: TableObject::Identifier(name.to_string()),
            alias: Some(alias.to_string()),
            pos: SourcePosition::default(),
        }
    }

    pub fn position(&self) -> SourcePosition {
        match self {
            TableReference::Object { pos, .. } | TableReference::Subquery { pos, .. } => *pos,
            TableReference::Join(j) => j.pos,
        }
    }
}

/// What a table reference names
#[derive(Debug, Clone, PartialEq)]
pub enum TableObject {
    /// File path, table alias, temporary table or inline table name
    Identifier(String),
    /// The process standard input, loaded once per session
    Stdin,
    /// The one-row, zero-column pseudo table
    Dual,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub left: TableReference,
    pub right: TableReference,
    pub join_type: JoinType,
    pub natural: bool,
    pub condition: Option<JoinCondition>,
    pub pos: SourcePosition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Cross,
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinCondition {
    On(Expression),
    Using(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByClause {
    pub items: Vec<OrderItem>,
    pub pos: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: Expression,
    pub direction: SortDirection,
    pub null_position: Option<NullPosition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullPosition {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitClause {
    pub value: Expression,
    pub percent: bool,
    pub with_ties: bool,
    pub pos: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffsetClause {
    pub value: Expression,
    pub pos: SourcePosition,
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct VariableAssignment {
    pub name: String,
    pub value: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionParameter {
    pub name: String,
    pub default: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchPosition {
    Next,
    Prior,
    First,
    Last,
    Absolute(Expression),
    Relative(Expression),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElseIf {
    pub condition: Expression,
    pub block: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseStatementWhen {
    pub condition: Expression,
    pub block: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertQuery {
    pub with: Option<WithClause>,
    pub table: String,
    pub fields: Option<Vec<FieldReference>>,
    pub source: InsertSource,
    pub pos: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    Values(Vec<RowValue>),
    Query(SelectQuery),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateAssignment {
    pub field: FieldReference,
    pub value: Expression,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateQuery {
    pub with: Option<WithClause>,
    pub table: TableReference,
    pub set_list: Vec<UpdateAssignment>,
    pub from: Option<FromClause>,
    pub where_clause: Option<Expression>,
    pub pos: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteQuery {
    pub with: Option<WithClause>,
    /// Target alias when FROM joins several tables; None deletes from the
    /// single FROM table
    pub table: Option<String>,
    pub from: FromClause,
    pub where_clause: Option<Expression>,
    pub pos: SourcePosition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectQuery),
    VariableDeclaration {
        assignments: Vec<VariableAssignment>,
        pos: SourcePosition,
    },
    VariableSubstitution {
        name: String,
        value: Expression,
        pos: SourcePosition,
    },
    DisposeVariable {
        name: String,
        pos: SourcePosition,
    },
    CursorDeclaration {
        name: String,
        query: SelectQuery,
        pos: SourcePosition,
    },
    OpenCursor {
        name: String,
        pos: SourcePosition,
    },
    CloseCursor {
        name: String,
        pos: SourcePosition,
    },
    DisposeCursor {
        name: String,
        pos: SourcePosition,
    },
    FetchCursor {
        name: String,
        position: FetchPosition,
        variables: Vec<String>,
        pos: SourcePosition,
    },
    /// DECLARE name TABLE - a temporary in-memory table in the current block
    TableDeclaration {
        name: String,
        columns: Option<Vec<String>>,
        query: Option<SelectQuery>,
        pos: SourcePosition,
    },
    DisposeTable {
        name: String,
        pos: SourcePosition,
    },
    FunctionDeclaration {
        name: String,
        parameters: Vec<FunctionParameter>,
        is_aggregate: bool,
        /// Name binding the partition's pseudo-cursor in aggregate functions
        cursor_name: Option<String>,
        body: Vec<Statement>,
        pos: SourcePosition,
    },
    DisposeFunction {
        name: String,
        pos: SourcePosition,
    },
    CreateTable {
        path: String,
        columns: Vec<String>,
        query: Option<SelectQuery>,
        pos: SourcePosition,
    },
    Insert(InsertQuery),
    Update(UpdateQuery),
    Delete(DeleteQuery),
    If {
        condition: Expression,
        then: Vec<Statement>,
        elseifs: Vec<ElseIf>,
        else_block: Option<Vec<Statement>>,
        pos: SourcePosition,
    },
    Case {
        subject: Option<Expression>,
        whens: Vec<CaseStatementWhen>,
        else_block: Option<Vec<Statement>>,
        pos: SourcePosition,
    },
    While {
        condition: Expression,
        body: Vec<Statement>,
        pos: SourcePosition,
    },
    /// FOR var [, var...] IN cursor LOOP ... END LOOP
    WhileInCursor {
        variables: Vec<String>,
        cursor: String,
        body: Vec<Statement>,
        pos: SourcePosition,
    },
    Continue {
        pos: SourcePosition,
    },
    Break {
        pos: SourcePosition,
    },
    Exit {
        code: Option<Expression>,
        pos: SourcePosition,
    },
    Return {
        value: Option<Expression>,
        pos: SourcePosition,
    },
    Commit {
        pos: SourcePosition,
    },
    Rollback {
        pos: SourcePosition,
    },
    Prepare {
        name: String,
        statement: String,
        pos: SourcePosition,
    },
    ExecutePrepared {
        name: String,
        values: Vec<Expression>,
        named_values: Vec<(String, Expression)>,
        pos: SourcePosition,
    },
    DisposePrepared {
        name: String,
        pos: SourcePosition,
    },
    ExecuteImmediate {
        source: Expression,
        values: Vec<Expression>,
        pos: SourcePosition,
    },
}

impl Statement {
    pub fn position(&self) -> SourcePosition {
        match self {
            Statement::Select(q) => q.pos,
            Statement::Insert(q) => q.pos,
            Statement::Update(q) => q.pos,
            Statement::Delete(q) => q.pos,
            Statement::VariableDeclaration { pos, .. }
            | Statement::VariableSubstitution { pos, .. }
            | Statement::DisposeVariable { pos, .. }
            | Statement::CursorDeclaration { pos, .. }
            | Statement::OpenCursor { pos, .. }
            | Statement::CloseCursor { pos, .. }
            | Statement::DisposeCursor { pos, .. }
            | Statement::FetchCursor { pos, .. }
            | Statement::TableDeclaration { pos, .. }
            | Statement::DisposeTable { pos, .. }
            | Statement::FunctionDeclaration { pos, .. }
            | Statement::DisposeFunction { pos, .. }
            | Statement::CreateTable { pos, .. }
            | Statement::If { pos, .. }
            | Statement::Case { pos, .. }
            | Statement::While { pos, .. }
            | Statement::WhileInCursor { pos, .. }
            | Statement::Continue { pos }
            | Statement::Break { pos }
            | Statement::Exit { pos, .. }
            | Statement::Return { pos, .. }
            | Statement::Commit { pos }
            | Statement::Rollback { pos }
            | Statement::Prepare { pos, .. }
            | Statement::ExecutePrepared { pos, .. }
            | Statement::DisposePrepared { pos, .. }
            | Statement::ExecuteImmediate { pos, .. } => *pos,
        }
    }
}
