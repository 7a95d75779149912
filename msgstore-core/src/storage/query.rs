//! Dialect-specific SQL for the message stores
//!
//! Templates are written once with a `%PREFIX%` placeholder and named
//! parameters; [`ChannelQueries::new`] and [`GroupQueries::new`] substitute
//! the table prefix eagerly so statement text is computed exactly once per
//! store. Dialects differ only in how a poll limits and locks the selected
//! row, how the tie-breaking sequence is generated, and how pages are cut.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Placeholder replaced by the configured table prefix
pub const PREFIX_PLACEHOLDER: &str = "%PREFIX%";

/// List parameter expanded to one placeholder per excluded id
pub const MESSAGE_IDS_PARAM: &str = ":message_ids";

/// Target database flavour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// SQLite 3.35+, single-statement `DELETE .. RETURNING` poll
    #[default]
    Sqlite,
    /// Older SQLite releases, select followed by delete
    #[serde(rename = "sqlite-compat")]
    SqliteCompat,
    Postgres,
    MySql,
    Oracle,
    SqlServer,
    H2,
    Hsql,
    Derby,
}

impl Dialect {
    pub const ALL: [Dialect; 9] = [
        Dialect::Sqlite,
        Dialect::SqliteCompat,
        Dialect::Postgres,
        Dialect::MySql,
        Dialect::Oracle,
        Dialect::SqlServer,
        Dialect::H2,
        Dialect::Hsql,
        Dialect::Derby,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::SqliteCompat => "sqlite-compat",
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
            Dialect::Oracle => "oracle",
            Dialect::SqlServer => "sqlserver",
            Dialect::H2 => "h2",
            Dialect::Hsql => "hsql",
            Dialect::Derby => "derby",
        }
    }

    /// Whether a poll selects, locks and deletes the row in one statement
    pub fn is_single_statement_poll(&self) -> bool {
        matches!(self, Dialect::Sqlite | Dialect::Postgres)
    }

    /// Whether the poll query takes a row lock that concurrent pollers skip
    pub fn supports_skip_locked(&self) -> bool {
        matches!(
            self,
            Dialect::Postgres | Dialect::MySql | Dialect::Oracle | Dialect::SqlServer
        )
    }

    /// Whether the statements can run on the bundled SQLite driver
    pub fn is_executable(&self) -> bool {
        matches!(self, Dialect::Sqlite | Dialect::SqliteCompat)
    }

    fn priority_order(&self) -> &'static str {
        match self {
            // NULL sorts lowest here, so DESC already puts it last
            Dialect::MySql | Dialect::SqlServer => {
                "MESSAGE_PRIORITY DESC, CREATED_DATE, MESSAGE_SEQUENCE"
            }
            // NULLS LAST needs SQLite 3.30
            Dialect::SqliteCompat => {
                "MESSAGE_PRIORITY IS NULL, MESSAGE_PRIORITY DESC, CREATED_DATE, MESSAGE_SEQUENCE"
            }
            _ => "MESSAGE_PRIORITY DESC NULLS LAST, CREATED_DATE, MESSAGE_SEQUENCE",
        }
    }

    /// Expression (or `None` for an identity column) producing the next
    /// `MESSAGE_SEQUENCE` value
    fn next_sequence(&self) -> Option<&'static str> {
        match self {
            Dialect::Sqlite | Dialect::SqliteCompat => Some(
                "(SELECT COALESCE(MAX(MESSAGE_SEQUENCE), 0) + 1 FROM %PREFIX%CHANNEL_MESSAGE)",
            ),
            Dialect::Postgres => Some("nextval('%PREFIX%MESSAGE_SEQ')"),
            Dialect::Oracle => Some("%PREFIX%MESSAGE_SEQ.NEXTVAL"),
            Dialect::SqlServer | Dialect::H2 | Dialect::Hsql | Dialect::Derby => {
                Some("NEXT VALUE FOR %PREFIX%MESSAGE_SEQ")
            }
            Dialect::MySql => None,
        }
    }

    fn poll_statement(&self, filter: &str, order: &str) -> String {
        let table = "%PREFIX%CHANNEL_MESSAGE";
        match self {
            Dialect::Sqlite => format!(
                "DELETE FROM {table} WHERE rowid = \
                 (SELECT rowid FROM {table} WHERE {filter} ORDER BY {order} LIMIT 1) \
                 RETURNING MESSAGE_ID, MESSAGE_BYTES"
            ),
            Dialect::Postgres => format!(
                "DELETE FROM {table} WHERE CTID = \
                 (SELECT CTID FROM {table} WHERE {filter} ORDER BY {order} LIMIT 1 FOR UPDATE SKIP LOCKED) \
                 RETURNING MESSAGE_ID, MESSAGE_BYTES"
            ),
            Dialect::SqliteCompat | Dialect::H2 | Dialect::Hsql => format!(
                "SELECT MESSAGE_ID, MESSAGE_BYTES FROM {table} WHERE {filter} ORDER BY {order} LIMIT 1"
            ),
            Dialect::MySql => format!(
                "SELECT MESSAGE_ID, MESSAGE_BYTES FROM {table} WHERE {filter} ORDER BY {order} \
                 LIMIT 1 FOR UPDATE SKIP LOCKED"
            ),
            // Only the first fetched row is read; the lock covers the rest
            Dialect::Oracle => format!(
                "SELECT MESSAGE_ID, MESSAGE_BYTES FROM {table} WHERE {filter} ORDER BY {order} \
                 FOR UPDATE SKIP LOCKED"
            ),
            Dialect::SqlServer => format!(
                "SELECT TOP 1 MESSAGE_ID, MESSAGE_BYTES FROM {table} WITH (UPDLOCK, READPAST, ROWLOCK) \
                 WHERE {filter} ORDER BY {order}"
            ),
            Dialect::Derby => format!(
                "SELECT MESSAGE_ID, MESSAGE_BYTES FROM {table} WHERE {filter} ORDER BY {order} \
                 FETCH FIRST ROW ONLY"
            ),
        }
    }

    /// Row limit appended to keyset pages
    fn page_clause(&self) -> &'static str {
        match self {
            Dialect::Oracle | Dialect::SqlServer | Dialect::Derby => {
                "OFFSET 0 ROWS FETCH NEXT :limit ROWS ONLY"
            }
            _ => "LIMIT :limit",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(Dialect::Sqlite),
            "sqlite-compat" | "sqlite_compat" => Ok(Dialect::SqliteCompat),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "oracle" => Ok(Dialect::Oracle),
            "sqlserver" | "mssql" => Ok(Dialect::SqlServer),
            "h2" => Ok(Dialect::H2),
            "hsql" | "hsqldb" => Ok(Dialect::Hsql),
            "derby" => Ok(Dialect::Derby),
            other => Err(format!("unknown dialect '{}'", other)),
        }
    }
}

fn with_prefix(template: &str, prefix: &str) -> String {
    template.replace(PREFIX_PLACEHOLDER, prefix)
}

/// Replace a list parameter with `len` numbered placeholders
///
/// `:message_ids` with `len = 3` becomes `:message_ids_0, :message_ids_1,
/// :message_ids_2`; bind the values under the same numbered names.
pub fn expand_list_param(sql: &str, param: &str, len: usize) -> String {
    let placeholders = (0..len)
        .map(|i| format!("{}_{}", param, i))
        .collect::<Vec<_>>()
        .join(", ");
    sql.replace(param, &placeholders)
}

/// Statement text for the channel message store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelQueries {
    dialect: Dialect,
    create_message: String,
    count_group_size: String,
    count_groups: String,
    count_messages: String,
    delete_group: String,
    delete_message: String,
    poll_oldest: String,
    poll_oldest_excluding_ids: String,
    poll_highest_priority: String,
    poll_highest_priority_excluding_ids: String,
    schema_probe: String,
}

impl ChannelQueries {
    pub fn new(dialect: Dialect, table_prefix: &str) -> Self {
        let filter = "GROUP_KEY = :group_key AND REGION = :region";
        let excluding = format!("{filter} AND MESSAGE_ID NOT IN ({MESSAGE_IDS_PARAM})");
        let fifo = "CREATED_DATE, MESSAGE_SEQUENCE";
        let priority = dialect.priority_order();

        let create_message = match dialect.next_sequence() {
            Some(sequence) => format!(
                "INSERT INTO %PREFIX%CHANNEL_MESSAGE \
                 (MESSAGE_ID, GROUP_KEY, REGION, CREATED_DATE, MESSAGE_PRIORITY, MESSAGE_SEQUENCE, MESSAGE_BYTES) \
                 VALUES (:message_id, :group_key, :region, :created_date, :priority, {sequence}, :message_bytes)"
            ),
            None => "INSERT INTO %PREFIX%CHANNEL_MESSAGE \
                     (MESSAGE_ID, GROUP_KEY, REGION, CREATED_DATE, MESSAGE_PRIORITY, MESSAGE_BYTES) \
                     VALUES (:message_id, :group_key, :region, :created_date, :priority, :message_bytes)"
                .to_string(),
        };

        let p = |sql: &str| with_prefix(sql, table_prefix);

        Self {
            dialect,
            create_message: p(&create_message),
            count_group_size: p(
                "SELECT COUNT(MESSAGE_ID) FROM %PREFIX%CHANNEL_MESSAGE \
                 WHERE GROUP_KEY = :group_key AND REGION = :region",
            ),
            count_groups: p(
                "SELECT COUNT(DISTINCT GROUP_KEY) FROM %PREFIX%CHANNEL_MESSAGE WHERE REGION = :region",
            ),
            count_messages: p(
                "SELECT COUNT(MESSAGE_ID) FROM %PREFIX%CHANNEL_MESSAGE WHERE REGION = :region",
            ),
            delete_group: p(
                "DELETE FROM %PREFIX%CHANNEL_MESSAGE WHERE GROUP_KEY = :group_key AND REGION = :region",
            ),
            delete_message: p(
                "DELETE FROM %PREFIX%CHANNEL_MESSAGE \
                 WHERE MESSAGE_ID = :message_id AND GROUP_KEY = :group_key AND REGION = :region",
            ),
            poll_oldest: p(&dialect.poll_statement(filter, fifo)),
            poll_oldest_excluding_ids: p(&dialect.poll_statement(&excluding, fifo)),
            poll_highest_priority: p(&dialect.poll_statement(filter, priority)),
            poll_highest_priority_excluding_ids: p(&dialect.poll_statement(&excluding, priority)),
            schema_probe: p("SELECT MESSAGE_ID FROM %PREFIX%CHANNEL_MESSAGE WHERE 1 = 0"),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn is_single_statement_poll(&self) -> bool {
        self.dialect.is_single_statement_poll()
    }

    pub fn create_message(&self) -> &str {
        &self.create_message
    }

    pub fn count_group_size(&self) -> &str {
        &self.count_group_size
    }

    pub fn count_groups(&self) -> &str {
        &self.count_groups
    }

    pub fn count_messages(&self) -> &str {
        &self.count_messages
    }

    pub fn delete_group(&self) -> &str {
        &self.delete_group
    }

    pub fn delete_message(&self) -> &str {
        &self.delete_message
    }

    pub fn poll_oldest(&self) -> &str {
        &self.poll_oldest
    }

    pub fn poll_oldest_excluding_ids(&self) -> &str {
        &self.poll_oldest_excluding_ids
    }

    pub fn poll_highest_priority(&self) -> &str {
        &self.poll_highest_priority
    }

    pub fn poll_highest_priority_excluding_ids(&self) -> &str {
        &self.poll_highest_priority_excluding_ids
    }

    /// Poll statement for the given ordering mode
    pub fn poll(&self, priority: bool, excluding_ids: bool) -> &str {
        match (priority, excluding_ids) {
            (false, false) => &self.poll_oldest,
            (false, true) => &self.poll_oldest_excluding_ids,
            (true, false) => &self.poll_highest_priority,
            (true, true) => &self.poll_highest_priority_excluding_ids,
        }
    }

    pub fn schema_probe(&self) -> &str {
        &self.schema_probe
    }
}

/// Statement text for the group message store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupQueries {
    pub(crate) group_exists: String,
    pub(crate) create_message_group: String,
    pub(crate) update_message_group: String,
    pub(crate) complete_group: String,
    pub(crate) update_last_released_sequence: String,
    pub(crate) update_group_condition: String,
    pub(crate) get_group_info: String,
    pub(crate) list_groups_page: String,
    pub(crate) count_all_groups: String,
    pub(crate) delete_message_group: String,

    pub(crate) create_message: String,
    pub(crate) get_message: String,
    pub(crate) get_message_count: String,
    pub(crate) delete_message: String,
    pub(crate) delete_unreferenced_message: String,
    pub(crate) delete_messages_exclusive_to_group: String,

    pub(crate) create_group_to_message: String,
    pub(crate) remove_message_from_group: String,
    pub(crate) remove_message_from_all_groups: String,
    pub(crate) remove_group_to_message_join: String,
    pub(crate) count_all_messages_in_groups: String,
    pub(crate) count_all_messages_in_group: String,

    pub(crate) list_messages_page: String,
    pub(crate) poll_from_group: String,

    pub(crate) schema_probes: [String; 3],
}

macro_rules! statement_getters {
    ($($name:ident),* $(,)?) => {
        $(
            pub fn $name(&self) -> &str {
                &self.$name
            }
        )*
    };
}

impl GroupQueries {
    statement_getters!(
        group_exists,
        create_message_group,
        update_message_group,
        complete_group,
        update_last_released_sequence,
        update_group_condition,
        get_group_info,
        list_groups_page,
        count_all_groups,
        delete_message_group,
        create_message,
        get_message,
        get_message_count,
        delete_message,
        delete_unreferenced_message,
        delete_messages_exclusive_to_group,
        create_group_to_message,
        remove_message_from_group,
        remove_message_from_all_groups,
        remove_group_to_message_join,
        count_all_messages_in_groups,
        count_all_messages_in_group,
        list_messages_page,
        poll_from_group,
    );

    pub fn schema_probes(&self) -> impl Iterator<Item = &str> {
        self.schema_probes.iter().map(String::as_str)
    }

    pub fn new(dialect: Dialect, table_prefix: &str) -> Self {
        let page = dialect.page_clause();
        let p = |sql: &str| with_prefix(sql, table_prefix);

        Self {
            group_exists: p(
                "SELECT COUNT(GROUP_KEY) FROM %PREFIX%MESSAGE_GROUP \
                 WHERE GROUP_KEY = :group_key AND REGION = :region",
            ),
            create_message_group: p(
                "INSERT INTO %PREFIX%MESSAGE_GROUP \
                 (GROUP_KEY, REGION, COMPLETE, LAST_RELEASED_SEQUENCE, CREATED_DATE, UPDATED_DATE) \
                 VALUES (:group_key, :region, 0, 0, :created_date, :updated_date)",
            ),
            update_message_group: p(
                "UPDATE %PREFIX%MESSAGE_GROUP SET UPDATED_DATE = :updated_date \
                 WHERE GROUP_KEY = :group_key AND REGION = :region",
            ),
            complete_group: p(
                "UPDATE %PREFIX%MESSAGE_GROUP SET UPDATED_DATE = :updated_date, COMPLETE = 1 \
                 WHERE GROUP_KEY = :group_key AND REGION = :region",
            ),
            update_last_released_sequence: p(
                "UPDATE %PREFIX%MESSAGE_GROUP \
                 SET UPDATED_DATE = :updated_date, LAST_RELEASED_SEQUENCE = :sequence \
                 WHERE GROUP_KEY = :group_key AND REGION = :region",
            ),
            update_group_condition: p(
                "UPDATE %PREFIX%MESSAGE_GROUP SET UPDATED_DATE = :updated_date, GROUP_CONDITION = :condition \
                 WHERE GROUP_KEY = :group_key AND REGION = :region",
            ),
            get_group_info: p(
                "SELECT GROUP_KEY, COMPLETE, LAST_RELEASED_SEQUENCE, CREATED_DATE, UPDATED_DATE, GROUP_CONDITION \
                 FROM %PREFIX%MESSAGE_GROUP WHERE GROUP_KEY = :group_key AND REGION = :region",
            ),
            list_groups_page: p(&format!(
                "SELECT GROUP_KEY, COMPLETE, LAST_RELEASED_SEQUENCE, CREATED_DATE, UPDATED_DATE, GROUP_CONDITION \
                 FROM %PREFIX%MESSAGE_GROUP WHERE REGION = :region AND GROUP_KEY > :after_key \
                 ORDER BY GROUP_KEY {page}"
            )),
            count_all_groups: p(
                "SELECT COUNT(GROUP_KEY) FROM %PREFIX%MESSAGE_GROUP WHERE REGION = :region",
            ),
            delete_message_group: p(
                "DELETE FROM %PREFIX%MESSAGE_GROUP WHERE GROUP_KEY = :group_key AND REGION = :region",
            ),

            create_message: p(
                "INSERT INTO %PREFIX%MESSAGE (MESSAGE_ID, REGION, CREATED_DATE, MESSAGE_BYTES) \
                 VALUES (:message_id, :region, :created_date, :message_bytes)",
            ),
            get_message: p(
                "SELECT MESSAGE_ID, MESSAGE_BYTES, CREATED_DATE FROM %PREFIX%MESSAGE \
                 WHERE MESSAGE_ID = :message_id AND REGION = :region",
            ),
            get_message_count: p(
                "SELECT COUNT(MESSAGE_ID) FROM %PREFIX%MESSAGE WHERE REGION = :region",
            ),
            delete_message: p(
                "DELETE FROM %PREFIX%MESSAGE WHERE MESSAGE_ID = :message_id AND REGION = :region",
            ),
            delete_unreferenced_message: p(
                "DELETE FROM %PREFIX%MESSAGE WHERE MESSAGE_ID = :message_id AND REGION = :region \
                 AND MESSAGE_ID NOT IN (SELECT MESSAGE_ID FROM %PREFIX%GROUP_TO_MESSAGE \
                 WHERE MESSAGE_ID = :message_id AND REGION = :region)",
            ),
            delete_messages_exclusive_to_group: p(
                "DELETE FROM %PREFIX%MESSAGE WHERE REGION = :region \
                 AND MESSAGE_ID IN (SELECT MESSAGE_ID FROM %PREFIX%GROUP_TO_MESSAGE \
                 WHERE GROUP_KEY = :group_key AND REGION = :region) \
                 AND MESSAGE_ID NOT IN (SELECT MESSAGE_ID FROM %PREFIX%GROUP_TO_MESSAGE \
                 WHERE GROUP_KEY <> :group_key AND REGION = :region)",
            ),

            create_group_to_message: p(
                "INSERT INTO %PREFIX%GROUP_TO_MESSAGE (GROUP_KEY, MESSAGE_ID, REGION) \
                 VALUES (:group_key, :message_id, :region)",
            ),
            remove_message_from_group: p(
                "DELETE FROM %PREFIX%GROUP_TO_MESSAGE \
                 WHERE GROUP_KEY = :group_key AND MESSAGE_ID = :message_id AND REGION = :region",
            ),
            remove_message_from_all_groups: p(
                "DELETE FROM %PREFIX%GROUP_TO_MESSAGE WHERE MESSAGE_ID = :message_id AND REGION = :region",
            ),
            remove_group_to_message_join: p(
                "DELETE FROM %PREFIX%GROUP_TO_MESSAGE WHERE GROUP_KEY = :group_key AND REGION = :region",
            ),
            count_all_messages_in_groups: p(
                "SELECT COUNT(MESSAGE_ID) FROM %PREFIX%GROUP_TO_MESSAGE WHERE REGION = :region",
            ),
            count_all_messages_in_group: p(
                "SELECT COUNT(MESSAGE_ID) FROM %PREFIX%GROUP_TO_MESSAGE \
                 WHERE GROUP_KEY = :group_key AND REGION = :region",
            ),

            list_messages_page: p(&format!(
                "SELECT m.MESSAGE_ID, m.MESSAGE_BYTES, m.CREATED_DATE FROM %PREFIX%MESSAGE m \
                 JOIN %PREFIX%GROUP_TO_MESSAGE g ON m.MESSAGE_ID = g.MESSAGE_ID AND m.REGION = g.REGION \
                 WHERE g.GROUP_KEY = :group_key AND g.REGION = :region \
                 AND (m.CREATED_DATE > :after_date \
                 OR (m.CREATED_DATE = :after_date AND m.MESSAGE_ID > :after_id)) \
                 ORDER BY m.CREATED_DATE, m.MESSAGE_ID {page}"
            )),
            poll_from_group: p(
                "SELECT MESSAGE_ID, MESSAGE_BYTES, CREATED_DATE FROM %PREFIX%MESSAGE \
                 WHERE REGION = :region AND MESSAGE_ID = \
                 (SELECT MIN(m.MESSAGE_ID) FROM %PREFIX%MESSAGE m \
                 JOIN %PREFIX%GROUP_TO_MESSAGE g ON m.MESSAGE_ID = g.MESSAGE_ID AND m.REGION = g.REGION \
                 WHERE g.GROUP_KEY = :group_key AND g.REGION = :region AND m.CREATED_DATE = \
                 (SELECT MIN(m2.CREATED_DATE) FROM %PREFIX%MESSAGE m2 \
                 JOIN %PREFIX%GROUP_TO_MESSAGE g2 ON m2.MESSAGE_ID = g2.MESSAGE_ID AND m2.REGION = g2.REGION \
                 WHERE g2.GROUP_KEY = :group_key AND g2.REGION = :region))",
            ),

            schema_probes: [
                p("SELECT MESSAGE_ID FROM %PREFIX%MESSAGE WHERE 1 = 0"),
                p("SELECT GROUP_KEY FROM %PREFIX%GROUP_TO_MESSAGE WHERE 1 = 0"),
                p("SELECT GROUP_KEY FROM %PREFIX%MESSAGE_GROUP WHERE 1 = 0"),
            ],
        }
    }
}
