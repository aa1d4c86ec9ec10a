// sqlx::Error -> AppError
//
// Orphan rules prevent `From<sqlx::Error> for AppError` here, so every
// adapter maps through this helper.

use ferry_core::error::AppError;

pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            // Extract database-specific error code and message
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    // UNIQUE / PRIMARY KEY constraint failed
                    "2067" | "1555" => AppError::Conflict(format!(
                        "Unique constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    // FOREIGN KEY constraint failed
                    "787" | "3850" => AppError::Database(format!(
                        "Foreign key constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    // SQLITE_BUSY - database is locked
                    "5" => AppError::Database(format!(
                        "Database locked (SQLITE_BUSY): {}",
                        db_err.message()
                    )),
                    // SQLITE_FULL - database or disk is full
                    "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                    _ => AppError::Database(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                AppError::Database(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        // Connection, pool, protocol errors
        _ => AppError::Database(err.to_string()),
    }
}

/// SQL list of in-flight statuses for `NOT IN (...)` guards
pub(crate) const IN_FLIGHT_SQL: &str = "('PREPARING', 'BACKING_UP', 'RESTORING', 'RETRY_PENDING')";

/// Narrow an INTEGER column to u32
pub(crate) fn column_u32(column: &str, value: i64) -> Result<u32, AppError> {
    u32::try_from(value)
        .map_err(|_| AppError::Database(format!("Column {} out of range: {}", column, value)))
}
