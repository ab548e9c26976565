// SQL text issued against MySQL catalogs.

pub const LIST_TABLES: &str = "SELECT CAST(TABLE_NAME AS CHAR) \
     FROM information_schema.TABLES \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' \
     ORDER BY TABLE_NAME";

pub const LIST_COLUMNS: &str = "SELECT CAST(COLUMN_NAME AS CHAR) \
     FROM information_schema.COLUMNS \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
     ORDER BY ORDINAL_POSITION";

/// `(table, column, data type)` of every primary key column.
pub const LIST_PRIMARY_KEY_COLUMNS: &str = "SELECT CAST(k.TABLE_NAME AS CHAR), CAST(k.COLUMN_NAME AS CHAR), \
     CAST(c.DATA_TYPE AS CHAR) \
     FROM information_schema.KEY_COLUMN_USAGE k \
     JOIN information_schema.COLUMNS c \
       ON c.TABLE_SCHEMA = k.TABLE_SCHEMA AND c.TABLE_NAME = k.TABLE_NAME \
      AND c.COLUMN_NAME = k.COLUMN_NAME \
     WHERE k.TABLE_SCHEMA = DATABASE() AND k.CONSTRAINT_NAME = 'PRIMARY' \
     ORDER BY k.TABLE_NAME, k.ORDINAL_POSITION";

const INTEGER_TYPES: &[&str] = &["tinyint", "smallint", "mediumint", "int", "integer", "bigint"];

/// Whether `MAX()` over a column of this `DATA_TYPE` is a meaningful id.
pub fn is_integer_type(data_type: &str) -> bool {
    INTEGER_TYPES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(data_type.trim()))
}

/// Backtick-quotes an identifier, doubling embedded backticks.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

pub fn max_value(table: &str, column: &str) -> String {
    format!(
        "SELECT CAST(MAX({}) AS SIGNED) FROM {}",
        quote_ident(column),
        quote_ident(table)
    )
}

/// One statement returning `(table_name, max_id)` for every `(table, key)` pair.
/// Each table name is a `?` placeholder, bound in `keys` order.
pub fn max_values(keys: &[(String, String)]) -> Option<String> {
    if keys.is_empty() {
        return None;
    }
    let selects: Vec<String> = keys
        .iter()
        .map(|(table, column)| {
            format!(
                "SELECT CAST(? AS CHAR) AS table_name, CAST(MAX({}) AS SIGNED) AS max_id FROM {}",
                quote_ident(column),
                quote_ident(table)
            )
        })
        .collect();
    Some(selects.join(" UNION ALL "))
}
