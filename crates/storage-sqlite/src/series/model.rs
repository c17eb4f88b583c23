use diesel::prelude::*;

#[derive(Queryable, Identifiable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::ts_records)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TsRecordDB {
    pub id: i32,
    pub series_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub data: String,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::ts_records)]
pub struct NewTsRecordDB {
    pub series_id: String,
    pub timestamp: i64,
    pub data: String,
}
