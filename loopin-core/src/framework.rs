use sqlx::PgPool;

/// Executes SQL against the shared pool.
///
/// Every query in `entities` is a plain struct with a
/// `kanau::processor::Processor` impl for this type.
#[derive(Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

impl DatabaseProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}
