//! # Identifier Namer
//!
//! Physical names for a board's partitions and preview cache.
//!
//! Short names are validated at the API boundary, but they still end up
//! interpolated into DDL, so every name and literal that reaches a statement
//! goes through [`quote_ident`] / [`quote_literal`] first.

use rb_core::ShortName;

/// The logical tables that get one partition per board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionedTable {
    Threads,
    Messages,
    Attachments,
    Replies,
}

impl PartitionedTable {
    /// Dependency order: each table only references tables before it.
    pub const ALL: [PartitionedTable; 4] = [
        PartitionedTable::Threads,
        PartitionedTable::Messages,
        PartitionedTable::Attachments,
        PartitionedTable::Replies,
    ];

    /// Name of the partitioned parent table.
    pub fn parent(self) -> &'static str {
        match self {
            PartitionedTable::Threads => "threads",
            PartitionedTable::Messages => "messages",
            PartitionedTable::Attachments => "attachments",
            PartitionedTable::Replies => "message_replies",
        }
    }
}

/// Unquoted partition name, e.g. `messages_b`.
pub fn partition_name(board: &ShortName, table: PartitionedTable) -> String {
    format!("{}_{}", table.parent(), board)
}

/// Unquoted preview cache name, e.g. `board_preview_b`.
pub fn cache_table_name(board: &ShortName) -> String {
    format!("board_preview_{}", board)
}

/// Double-quotes an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    let mut quoted = String::with_capacity(ident.len() + 2);
    quoted.push('"');
    for c in ident.chars().filter(|c| *c != '\0') {
        if c == '"' {
            quoted.push('"');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Single-quotes a string literal, doubling embedded quotes. Backslashes
/// switch to the `E'...'` form so the result is safe regardless of
/// `standard_conforming_strings`.
pub fn quote_literal(value: &str) -> String {
    let has_backslash = value.contains('\\');
    let mut quoted = String::with_capacity(value.len() + 3);
    if has_backslash {
        quoted.push('E');
    }
    quoted.push('\'');
    for c in value.chars().filter(|c| *c != '\0') {
        match c {
            '\'' => quoted.push_str("''"),
            '\\' => quoted.push_str("\\\\"),
            _ => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

/// Quoted physical names of one board's storage.
#[derive(Debug, Clone)]
pub struct BoardTables {
    board: ShortName,
}

impl BoardTables {
    pub fn new(board: &ShortName) -> Self {
        Self {
            board: board.clone(),
        }
    }

    pub fn board(&self) -> &ShortName {
        &self.board
    }

    /// The board name as a quoted SQL literal, for `FOR VALUES IN (...)`.
    pub fn board_literal(&self) -> String {
        quote_literal(self.board.as_str())
    }

    pub fn partition(&self, table: PartitionedTable) -> String {
        quote_ident(&partition_name(&self.board, table))
    }

    pub fn threads(&self) -> String {
        self.partition(PartitionedTable::Threads)
    }

    pub fn messages(&self) -> String {
        self.partition(PartitionedTable::Messages)
    }

    pub fn attachments(&self) -> String {
        self.partition(PartitionedTable::Attachments)
    }

    pub fn replies(&self) -> String {
        self.partition(PartitionedTable::Replies)
    }

    pub fn cache(&self) -> String {
        quote_ident(&cache_table_name(&self.board))
    }

    /// Unique index the concurrent refresh depends on.
    pub fn cache_key_index(&self) -> String {
        quote_ident(&format!("{}_key", cache_table_name(&self.board)))
    }

    pub fn cache_rank_index(&self) -> String {
        quote_ident(&format!("{}_rank_idx", cache_table_name(&self.board)))
    }
}
