//! Entity metadata and field access.
//!
//! `EntityMetadata` is the per-table contract the statement builder consumes.
//! `Entity` exposes a record's fields by column name, either from a decoded
//! `Row` or from a typed struct through a `FieldAccessors` function table.

use crate::error::{DbError, DbResult};
use crate::models::query::{QueryParam, Row};
use std::sync::LazyLock;

/// Static description of a table's shape.
pub trait EntityMetadata: Send + Sync {
    fn id_field(&self) -> &str;
    fn table_name(&self) -> &str;
    /// Columns written by INSERT, in binding order.
    fn insertable_fields(&self) -> &[String];
    /// Columns written by UPDATE, in binding order.
    fn updatable_fields(&self) -> &[String];
}

/// Owned `EntityMetadata` value, usually declared once per table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    table_name: String,
    id_field: String,
    insertable_fields: Vec<String>,
    updatable_fields: Vec<String>,
}

impl TableMetadata {
    pub fn new(table_name: impl Into<String>, id_field: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            id_field: id_field.into(),
            insertable_fields: Vec::new(),
            updatable_fields: Vec::new(),
        }
    }

    pub fn with_insertable<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insertable_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_updatable<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.updatable_fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

impl EntityMetadata for TableMetadata {
    fn id_field(&self) -> &str {
        &self.id_field
    }

    fn table_name(&self) -> &str {
        &self.table_name
    }

    fn insertable_fields(&self) -> &[String] {
        &self.insertable_fields
    }

    fn updatable_fields(&self) -> &[String] {
        &self.updatable_fields
    }
}

/// Metadata of the table backing emulated sequences.
pub static SEQUENCE_DATA: LazyLock<TableMetadata> = LazyLock::new(|| {
    TableMetadata::new("SEQUENCE_DATA", "sequence_name")
        .with_insertable([
            "sequence_name",
            "sequence_increment",
            "sequence_min_value",
            "sequence_max_value",
            "sequence_cur_value",
            "sequence_cycle",
        ])
        .with_updatable([
            "sequence_increment",
            "sequence_min_value",
            "sequence_max_value",
            "sequence_cur_value",
            "sequence_cycle",
        ])
});

/// A record whose fields can be read by column name.
pub trait Entity: Send + Sync {
    /// Current value of `name`, or `None` when the record has no such field.
    fn field(&self, name: &str) -> Option<QueryParam>;
}

impl Entity for Row {
    fn field(&self, name: &str) -> Option<QueryParam> {
        self.get(name)
            .or_else(|| {
                self.iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value)
            })
            .map(QueryParam::from_json)
    }
}

impl<T: Entity + ?Sized> Entity for &T {
    fn field(&self, name: &str) -> Option<QueryParam> {
        (**self).field(name)
    }
}

impl<T: Entity + ?Sized> Entity for std::sync::Arc<T> {
    fn field(&self, name: &str) -> Option<QueryParam> {
        (**self).field(name)
    }
}

pub type Getter<E> = fn(&E) -> QueryParam;
pub type Setter<E> = fn(&mut E, QueryParam) -> DbResult<()>;

struct FieldAccessor<E> {
    name: &'static str,
    get: Getter<E>,
    set: Option<Setter<E>>,
}

/// Column name to getter/setter table for a typed entity.
///
/// ```ignore
/// static USER_FIELDS: LazyLock<FieldAccessors<User>> = LazyLock::new(|| {
///     FieldAccessors::<User>::new()
///         .field("ID", |u| u.id.into(), |u, v| { u.id = v.try_into()?; Ok(()) })
///         .read_only("CREATED_AT", |u| u.created_at.clone().into())
/// });
/// ```
pub struct FieldAccessors<E> {
    fields: Vec<FieldAccessor<E>>,
}

impl<E> FieldAccessors<E> {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Register a readable and writable field.
    pub fn field(mut self, name: &'static str, get: Getter<E>, set: Setter<E>) -> Self {
        self.fields.push(FieldAccessor {
            name,
            get,
            set: Some(set),
        });
        self
    }

    /// Register a field that can only be read.
    pub fn read_only(mut self, name: &'static str, get: Getter<E>) -> Self {
        self.fields.push(FieldAccessor {
            name,
            get,
            set: None,
        });
        self
    }

    fn find(&self, name: &str) -> Option<&FieldAccessor<E>> {
        self.fields.iter().find(|f| f.name == name).or_else(|| {
            self.fields
                .iter()
                .find(|f| f.name.eq_ignore_ascii_case(name))
        })
    }

    pub fn get(&self, entity: &E, name: &str) -> Option<QueryParam> {
        self.find(name).map(|f| (f.get)(entity))
    }

    pub fn set(&self, entity: &mut E, name: &str, value: QueryParam) -> DbResult<()> {
        let accessor = self
            .find(name)
            .ok_or_else(|| DbError::invalid_input(format!("Unknown field: {}", name)))?;
        let setter = accessor
            .set
            .ok_or_else(|| DbError::invalid_input(format!("Field is read-only: {}", name)))?;
        setter(entity, value)
    }
}

impl<E> Default for FieldAccessors<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a patch holding only the updatable fields of `entity`.
pub fn map_to_patch(metadata: &dyn EntityMetadata, entity: &dyn Entity) -> Row {
    metadata
        .updatable_fields()
        .iter()
        .filter_map(|name| entity.field(name).map(|v| (name.clone(), v.to_json())))
        .collect()
}

/// Copy the updatable fields present in `patch` onto `entity`.
///
/// Fields outside the updatable list (including the id) are ignored.
pub fn merge_patch<E>(
    metadata: &dyn EntityMetadata,
    accessors: &FieldAccessors<E>,
    patch: &dyn Entity,
    entity: &mut E,
) -> DbResult<()> {
    for name in metadata.updatable_fields() {
        if let Some(value) = patch.field(name) {
            accessors.set(entity, name, value)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct User {
        id: i64,
        name: String,
        email: Option<String>,
    }

    static USER_FIELDS: LazyLock<FieldAccessors<User>> = LazyLock::new(|| {
        FieldAccessors::<User>::new()
            .read_only("ID", |u| u.id.into())
            .field("NAME", |u| u.name.clone().into(), |u, v| {
                u.name = v.try_into()?;
                Ok(())
            })
            .field("EMAIL", |u| u.email.clone().into(), |u, v| {
                u.email = match v {
                    QueryParam::Null => None,
                    other => Some(other.try_into()?),
                };
                Ok(())
            })
    });

    impl Entity for User {
        fn field(&self, name: &str) -> Option<QueryParam> {
            USER_FIELDS.get(self, name)
        }
    }

    fn users() -> TableMetadata {
        TableMetadata::new("USERS", "ID")
            .with_insertable(["ID", "NAME", "EMAIL"])
            .with_updatable(["NAME", "EMAIL"])
    }

    #[test]
    fn test_table_metadata_accessors() {
        let meta = users();
        assert_eq!(meta.table_name(), "USERS");
        assert_eq!(meta.id_field(), "ID");
        assert_eq!(meta.insertable_fields(), ["ID", "NAME", "EMAIL"]);
        assert_eq!(meta.updatable_fields(), ["NAME", "EMAIL"]);
    }

    #[test]
    fn test_row_field_lookup_falls_back_to_case_insensitive() {
        let row = json!({"id": 3, "NAME": "x"}).as_object().unwrap().clone();
        assert_eq!(row.field("ID"), Some(QueryParam::Int(3)));
        assert_eq!(row.field("NAME"), Some(QueryParam::String("x".into())));
        assert_eq!(row.field("EMAIL"), None);
    }

    #[test]
    fn test_typed_entity_field_access() {
        let user = User {
            id: 9,
            name: "ann".into(),
            email: None,
        };
        assert_eq!(user.field("ID"), Some(QueryParam::Int(9)));
        assert_eq!(user.field("email"), Some(QueryParam::Null));
        assert_eq!(user.field("AGE"), None);
    }

    #[test]
    fn test_read_only_field_rejects_set() {
        let mut user = User::default();
        let result = USER_FIELDS.set(&mut user, "ID", QueryParam::Int(1));
        assert!(matches!(result, Err(DbError::InvalidInput { .. })));
    }

    #[test]
    fn test_map_to_patch_keeps_updatable_fields_only() {
        let user = User {
            id: 1,
            name: "bob".into(),
            email: Some("b@x".into()),
        };
        let patch = map_to_patch(&users(), &user);
        assert_eq!(patch.len(), 2);
        assert_eq!(patch["NAME"], json!("bob"));
        assert!(!patch.contains_key("ID"));
    }

    #[test]
    fn test_merge_patch_applies_present_fields() {
        let mut user = User {
            id: 1,
            name: "bob".into(),
            email: Some("b@x".into()),
        };
        let patch = json!({"ID": 99, "EMAIL": null}).as_object().unwrap().clone();
        merge_patch(&users(), &*USER_FIELDS, &patch, &mut user).unwrap();
        assert_eq!(user.id, 1);
        assert_eq!(user.name, "bob");
        assert_eq!(user.email, None);
    }

    #[test]
    fn test_sequence_data_metadata() {
        assert_eq!(SEQUENCE_DATA.table_name(), "SEQUENCE_DATA");
        assert_eq!(SEQUENCE_DATA.id_field(), "sequence_name");
        assert!(!SEQUENCE_DATA.updatable_fields().contains(&"sequence_name".to_string()));
    }
}
