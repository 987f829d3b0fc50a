//! Organization hierarchy repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist org nodes and their segmented hierarchy codes.
//! - Own sibling code generation, move validation and the cascading descendant
//!   rewrite, so each runs under the same write transaction as its mutation.
//!
//! # Invariants
//! - Only active (`is_deleted=0`) nodes are returned by reads and accepted as
//!   parents.
//! - Code generation also counts tombstoned siblings, so codes are never reused.
//! - Every mutation runs in one `BEGIN IMMEDIATE` transaction; validation reads
//!   happen under that lock, and any failure rolls back all writes.
//! - Listings are ordered by `code ASC`.
//! - Tree reads are one statement each, so a concurrent move is seen either
//!   entirely or not at all.
//! - Prefix scans use `code >= p AND code < p || ':'` (`':'` sorts right after
//!   `'9'`), which stays on the unique code index.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::code::{CodeError, OrgCode, SEGMENT_WIDTH};
use crate::model::org::{AuditStamp, OrgId, OrgNode, OrgNodeFields, ROOT_PARENT_ID};
use rusqlite::{params, Connection, OptionalExtension, Row, Rows, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

const ORG_NODE_COLUMNS: &[&str] = &[
    "id",
    "code",
    "parent_id",
    "name",
    "name_abbr",
    "comment",
    "is_deleted",
    "created_by",
    "created_at",
    "updated_by",
    "updated_at",
];

const ORG_NODE_SELECT_SQL: &str = "SELECT
    id,
    code,
    parent_id,
    name,
    name_abbr,
    comment,
    is_deleted,
    created_by,
    created_at,
    updated_by,
    updated_at
FROM org_nodes";

/// Result type used by org repository operations.
pub type OrgRepoResult<T> = Result<T, OrgRepoError>;

/// Errors from org repository operations.
#[derive(Debug)]
pub enum OrgRepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Target node does not exist or is soft-deleted.
    NodeNotFound(OrgId),
    /// Referenced parent does not exist or is soft-deleted.
    ParentNotFound(OrgId),
    /// Node was targeted as its own parent.
    SelfParent(OrgId),
    /// Target parent lies inside the mover's own subtree.
    CyclicMove { node_id: OrgId, parent_id: OrgId },
    /// Delete attempted on a node with active children.
    HasChildren(OrgId),
    /// Sibling code space under the parent is exhausted.
    CapacityExceeded { parent_id: OrgId },
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl Display for OrgRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NodeNotFound(id) => write!(f, "org node not found: {id}"),
            Self::ParentNotFound(id) => write!(f, "org parent not found: {id}"),
            Self::SelfParent(id) => write!(f, "org node {id} cannot be its own parent"),
            Self::CyclicMove { node_id, parent_id } => write!(
                f,
                "move would create cycle: node {node_id} under its descendant {parent_id}"
            ),
            Self::HasChildren(id) => write!(f, "org node {id} still has children"),
            Self::CapacityExceeded { parent_id } => {
                write!(f, "no sibling code left under parent {parent_id}")
            }
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "org repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "org repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "org repository requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid org data: {message}"),
        }
    }
}

impl Error for OrgRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for OrgRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for OrgRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Result of a committed move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// New parent equals the current parent; nothing was written.
    Unchanged,
    /// Node and its subtree were re-coded.
    Moved {
        old_code: OrgCode,
        new_code: OrgCode,
        /// Strict descendants whose code was rewritten, tombstones included.
        descendants_rewritten: usize,
    },
}

/// Repository interface for org hierarchy operations.
pub trait OrgRepository {
    /// Computes the code the next child of `parent_id` would receive.
    fn generate_code(&self, parent_id: OrgId) -> OrgRepoResult<OrgCode>;
    /// Creates one node under `parent_id` with a freshly generated code.
    fn create_node(
        &self,
        id: OrgId,
        parent_id: OrgId,
        fields: &OrgNodeFields,
        stamp: &AuditStamp,
    ) -> OrgRepoResult<OrgNode>;
    /// Loads one node by id.
    fn get_node(&self, id: OrgId, include_deleted: bool) -> OrgRepoResult<Option<OrgNode>>;
    /// Lists active children of `parent_id` (`ROOT_PARENT_ID` lists roots).
    fn list_children(&self, parent_id: OrgId) -> OrgRepoResult<Vec<OrgNode>>;
    /// Lists every active node of every tree.
    fn list_active_nodes(&self) -> OrgRepoResult<Vec<OrgNode>>;
    /// Lists the active nodes of the tree containing active node `id`, from
    /// its top-level root down. Empty when `id` is unknown or deleted.
    fn list_tree_of(&self, id: OrgId) -> OrgRepoResult<Vec<OrgNode>>;
    /// Replaces descriptive fields of one active node.
    fn update_fields(
        &self,
        id: OrgId,
        fields: &OrgNodeFields,
        stamp: &AuditStamp,
    ) -> OrgRepoResult<OrgNode>;
    /// Re-parents one node and rewrites the codes of its whole subtree.
    fn move_node(
        &self,
        id: OrgId,
        new_parent_id: OrgId,
        stamp: &AuditStamp,
    ) -> OrgRepoResult<MoveOutcome>;
    /// Soft-deletes one childless node.
    fn delete_node(&self, id: OrgId, stamp: &AuditStamp) -> OrgRepoResult<()>;
}

/// SQLite-backed org hierarchy repository.
pub struct SqliteOrgRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteOrgRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> OrgRepoResult<Self> {
        ensure_org_connection_ready(conn)?;
        Ok(Self { conn })
    }

    fn begin_write(&self) -> OrgRepoResult<Transaction<'conn>> {
        Ok(Transaction::new_unchecked(
            self.conn,
            TransactionBehavior::Immediate,
        )?)
    }
}

impl OrgRepository for SqliteOrgRepository<'_> {
    fn generate_code(&self, parent_id: OrgId) -> OrgRepoResult<OrgCode> {
        let parent_code = resolve_parent_code(self.conn, parent_id)?;
        next_child_code(self.conn, parent_id, parent_code.as_ref())
    }

    fn create_node(
        &self,
        id: OrgId,
        parent_id: OrgId,
        fields: &OrgNodeFields,
        stamp: &AuditStamp,
    ) -> OrgRepoResult<OrgNode> {
        let tx = self.begin_write()?;
        let parent_code = resolve_parent_code(&tx, parent_id)?;
        let code = next_child_code(&tx, parent_id, parent_code.as_ref())?;

        tx.execute(
            "INSERT INTO org_nodes (
                id,
                code,
                parent_id,
                name,
                name_abbr,
                comment,
                is_deleted,
                created_by,
                created_at,
                updated_by,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?8, ?7, ?8);",
            params![
                id,
                code.as_str(),
                parent_id,
                fields.name,
                fields.name_abbr,
                fields.comment,
                stamp.actor,
                stamp.at_ms,
            ],
        )?;

        let node = load_active_node(&tx, id)?.ok_or(OrgRepoError::NodeNotFound(id))?;
        tx.commit()?;
        Ok(node)
    }

    fn get_node(&self, id: OrgId, include_deleted: bool) -> OrgRepoResult<Option<OrgNode>> {
        if include_deleted {
            query_one(
                self.conn,
                &format!("{ORG_NODE_SELECT_SQL} WHERE id = ?1;"),
                id,
            )
        } else {
            load_active_node(self.conn, id)
        }
    }

    fn list_children(&self, parent_id: OrgId) -> OrgRepoResult<Vec<OrgNode>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ORG_NODE_SELECT_SQL}
             WHERE parent_id = ?1
               AND is_deleted = 0
             ORDER BY code ASC;"
        ))?;
        let rows = stmt.query([parent_id])?;
        collect_nodes(rows)
    }

    fn list_active_nodes(&self) -> OrgRepoResult<Vec<OrgNode>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ORG_NODE_SELECT_SQL}
             WHERE is_deleted = 0
             ORDER BY code ASC;"
        ))?;
        let rows = stmt.query([])?;
        collect_nodes(rows)
    }

    fn list_tree_of(&self, id: OrgId) -> OrgRepoResult<Vec<OrgNode>> {
        // The top-level prefix is resolved inside the same statement as the scan.
        let mut stmt = self.conn.prepare(&format!(
            "WITH target AS (
                SELECT substr(code, 1, ?2) AS prefix
                FROM org_nodes
                WHERE id = ?1
                  AND is_deleted = 0
             )
             {ORG_NODE_SELECT_SQL}
             JOIN target
               ON code >= target.prefix
              AND code < target.prefix || ':'
             WHERE is_deleted = 0
             ORDER BY code ASC;"
        ))?;
        let rows = stmt.query(params![id, SEGMENT_WIDTH as i64])?;
        collect_nodes(rows)
    }

    fn update_fields(
        &self,
        id: OrgId,
        fields: &OrgNodeFields,
        stamp: &AuditStamp,
    ) -> OrgRepoResult<OrgNode> {
        let tx = self.begin_write()?;
        let changed = tx.execute(
            "UPDATE org_nodes
             SET name = ?2,
                 name_abbr = ?3,
                 comment = ?4,
                 updated_by = ?5,
                 updated_at = ?6
             WHERE id = ?1
               AND is_deleted = 0;",
            params![
                id,
                fields.name,
                fields.name_abbr,
                fields.comment,
                stamp.actor,
                stamp.at_ms,
            ],
        )?;
        if changed == 0 {
            return Err(OrgRepoError::NodeNotFound(id));
        }

        let node = load_active_node(&tx, id)?.ok_or(OrgRepoError::NodeNotFound(id))?;
        tx.commit()?;
        Ok(node)
    }

    fn move_node(
        &self,
        id: OrgId,
        new_parent_id: OrgId,
        stamp: &AuditStamp,
    ) -> OrgRepoResult<MoveOutcome> {
        let tx = self.begin_write()?;
        let node = load_active_node(&tx, id)?.ok_or(OrgRepoError::NodeNotFound(id))?;
        if node.parent_id == new_parent_id {
            return Ok(MoveOutcome::Unchanged);
        }

        let parent_code = validate_move(&tx, &node, new_parent_id)?;
        let new_code = next_child_code(&tx, new_parent_id, parent_code.as_ref())?;
        let old_code = node.code;

        tx.execute(
            "UPDATE org_nodes
             SET parent_id = ?2,
                 code = ?3,
                 updated_by = ?4,
                 updated_at = ?5
             WHERE id = ?1
               AND is_deleted = 0;",
            params![id, new_parent_id, new_code.as_str(), stamp.actor, stamp.at_ms],
        )?;
        let descendants_rewritten = rewrite_descendants(&tx, &old_code, &new_code, stamp)?;

        tx.commit()?;
        Ok(MoveOutcome::Moved {
            old_code,
            new_code,
            descendants_rewritten,
        })
    }

    fn delete_node(&self, id: OrgId, stamp: &AuditStamp) -> OrgRepoResult<()> {
        let tx = self.begin_write()?;
        if load_active_node(&tx, id)?.is_none() {
            return Err(OrgRepoError::NodeNotFound(id));
        }

        let has_children: i64 = tx.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM org_nodes
                WHERE parent_id = ?1
                  AND is_deleted = 0
            );",
            [id],
            |row| row.get(0),
        )?;
        if has_children == 1 {
            return Err(OrgRepoError::HasChildren(id));
        }

        tx.execute(
            "UPDATE org_nodes
             SET is_deleted = 1,
                 updated_by = ?2,
                 updated_at = ?3
             WHERE id = ?1
               AND is_deleted = 0;",
            params![id, stamp.actor, stamp.at_ms],
        )?;
        tx.commit()?;
        Ok(())
    }
}

/// Returns the parent's code, or `None` for `ROOT_PARENT_ID`.
fn resolve_parent_code(conn: &Connection, parent_id: OrgId) -> OrgRepoResult<Option<OrgCode>> {
    if parent_id == ROOT_PARENT_ID {
        return Ok(None);
    }
    let parent =
        load_active_node(conn, parent_id)?.ok_or(OrgRepoError::ParentNotFound(parent_id))?;
    Ok(Some(parent.code))
}

/// Code generator: greatest sibling code plus one, or the first child code.
///
/// Tombstoned siblings take part so deleted codes are never handed out again.
fn next_child_code(
    conn: &Connection,
    parent_id: OrgId,
    parent_code: Option<&OrgCode>,
) -> OrgRepoResult<OrgCode> {
    let greatest: Option<String> = conn
        .query_row(
            "SELECT code
             FROM org_nodes
             WHERE parent_id = ?1
             ORDER BY code DESC
             LIMIT 1;",
            [parent_id],
            |row| row.get(0),
        )
        .optional()?;

    let Some(greatest) = greatest else {
        return Ok(OrgCode::first_child_of(parent_code));
    };
    let greatest = parse_code(greatest)?;
    if let Some(parent_code) = parent_code {
        if greatest.parent().as_ref() != Some(parent_code) {
            return Err(OrgRepoError::InvalidData(format!(
                "child code {greatest} does not extend parent code {parent_code}"
            )));
        }
    }

    greatest.next_sibling().map_err(|err| match err {
        CodeError::CapacityExceeded { .. } => OrgRepoError::CapacityExceeded { parent_id },
        other => OrgRepoError::InvalidData(other.to_string()),
    })
}

/// Move validator. Returns the new parent's code (`None` for a root move).
fn validate_move(
    conn: &Connection,
    node: &OrgNode,
    new_parent_id: OrgId,
) -> OrgRepoResult<Option<OrgCode>> {
    if new_parent_id == ROOT_PARENT_ID {
        return Ok(None);
    }
    if new_parent_id == node.id {
        return Err(OrgRepoError::SelfParent(node.id));
    }

    let parent = load_active_node(conn, new_parent_id)?
        .ok_or(OrgRepoError::ParentNotFound(new_parent_id))?;
    if parent.code.is_within(&node.code) {
        return Err(OrgRepoError::CyclicMove {
            node_id: node.id,
            parent_id: new_parent_id,
        });
    }
    Ok(Some(parent.code))
}

/// Descendant rewriter: one bulk statement swapping `old_prefix` for
/// `new_prefix` on every strict descendant, tombstones included.
fn rewrite_descendants(
    conn: &Connection,
    old_prefix: &OrgCode,
    new_prefix: &OrgCode,
    stamp: &AuditStamp,
) -> OrgRepoResult<usize> {
    let suffix_start = old_prefix.as_str().len() as i64 + 1;
    let rewritten = conn.execute(
        "UPDATE org_nodes
         SET code = ?2 || substr(code, ?3),
             updated_by = ?4,
             updated_at = ?5
         WHERE code > ?1
           AND code < ?1 || ':';",
        params![
            old_prefix.as_str(),
            new_prefix.as_str(),
            suffix_start,
            stamp.actor,
            stamp.at_ms,
        ],
    )?;
    Ok(rewritten)
}

fn load_active_node(conn: &Connection, id: OrgId) -> OrgRepoResult<Option<OrgNode>> {
    query_one(
        conn,
        &format!("{ORG_NODE_SELECT_SQL} WHERE id = ?1 AND is_deleted = 0;"),
        id,
    )
}

fn query_one(conn: &Connection, sql: &str, id: OrgId) -> OrgRepoResult<Option<OrgNode>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([id])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_org_node_row(row)?));
    }
    Ok(None)
}

fn collect_nodes(mut rows: Rows<'_>) -> OrgRepoResult<Vec<OrgNode>> {
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(parse_org_node_row(row)?);
    }
    Ok(items)
}

fn parse_org_node_row(row: &Row<'_>) -> OrgRepoResult<OrgNode> {
    let code = parse_code(row.get("code")?)?;

    let is_deleted = match row.get::<_, i64>("is_deleted")? {
        0 => false,
        1 => true,
        other => {
            return Err(OrgRepoError::InvalidData(format!(
                "invalid is_deleted value `{other}` in org_nodes.is_deleted"
            )));
        }
    };

    Ok(OrgNode {
        id: row.get("id")?,
        code,
        parent_id: row.get("parent_id")?,
        name: row.get("name")?,
        name_abbr: row.get("name_abbr")?,
        comment: row.get("comment")?,
        is_deleted,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
        updated_by: row.get("updated_by")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_code(value: String) -> OrgRepoResult<OrgCode> {
    OrgCode::parse(value).map_err(|err| OrgRepoError::InvalidData(format!("{err} in org_nodes.code")))
}

fn ensure_org_connection_ready(conn: &Connection) -> OrgRepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(OrgRepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    if !table_exists(conn, "org_nodes")? {
        return Err(OrgRepoError::MissingRequiredTable("org_nodes"));
    }

    let present = table_columns(conn, "org_nodes")?;
    for &column in ORG_NODE_COLUMNS {
        if !present.iter().any(|name| name == column) {
            return Err(OrgRepoError::MissingRequiredColumn {
                table: "org_nodes",
                column,
            });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> OrgRepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_columns(conn: &Connection, table: &str) -> OrgRepoResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(row.get(1)?);
    }
    Ok(columns)
}
