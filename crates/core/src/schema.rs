use crate::ids::Generation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeySchema {
    pub constraint_name: String,
    pub column_name: String,
    pub referenced_schema: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    pub indexes: Vec<IndexSchema>,
    pub foreign_keys: Vec<ForeignKeySchema>,
}

impl TableSchema {
    /// A table known only by name; introspection fills in the rest.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaNode {
    pub name: String,
    pub tables: Vec<TableSchema>,
}

impl SchemaNode {
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|table| table.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DatabaseSchema {
    pub name: String,
    pub schemas: Vec<SchemaNode>,
}

impl DatabaseSchema {
    #[must_use]
    pub fn schema(&self, name: &str) -> Option<&SchemaNode> {
        self.schemas.iter().find(|schema| schema.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RelationshipDirection {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRelationship {
    pub direction: RelationshipDirection,
    pub constraint_name: String,
    pub source_column: String,
    pub related_schema: String,
    pub related_table: String,
    pub related_column: String,
}

/// Result of the most recent successful schema load for one connection
/// generation. A newer snapshot replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSnapshot {
    generation: Generation,
    databases: Vec<DatabaseSchema>,
    warnings: Vec<String>,
}

impl SchemaSnapshot {
    #[must_use]
    pub fn new(generation: Generation, databases: Vec<DatabaseSchema>, warnings: Vec<String>) -> Self {
        Self {
            generation,
            databases,
            warnings,
        }
    }

    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    #[must_use]
    pub fn databases(&self) -> &[DatabaseSchema] {
        &self.databases
    }

    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    #[must_use]
    pub fn database(&self, name: &str) -> Option<&DatabaseSchema> {
        self.databases.iter().find(|database| database.name == name)
    }

    #[must_use]
    pub fn table(&self, database: &str, schema: &str, table: &str) -> Option<&TableSchema> {
        self.database(database)
            .and_then(|database| database.schema(schema))
            .and_then(|schema| schema.table(table))
    }

    #[must_use]
    pub fn table_count(&self) -> usize {
        self.databases
            .iter()
            .flat_map(|database| &database.schemas)
            .map(|schema| schema.tables.len())
            .sum()
    }

    #[must_use]
    pub fn related_tables(
        &self,
        database_name: &str,
        schema_name: &str,
        table_name: &str,
    ) -> Vec<TableRelationship> {
        let mut relationships = Vec::new();

        let Some(schema) = self
            .database(database_name)
            .and_then(|database| database.schema(schema_name))
        else {
            return relationships;
        };

        if let Some(table) = schema.table(table_name) {
            for foreign_key in &table.foreign_keys {
                relationships.push(TableRelationship {
                    direction: RelationshipDirection::Outbound,
                    constraint_name: foreign_key.constraint_name.clone(),
                    source_column: foreign_key.column_name.clone(),
                    related_schema: foreign_key.referenced_schema.clone(),
                    related_table: foreign_key.referenced_table.clone(),
                    related_column: foreign_key.referenced_column.clone(),
                });
            }
        }

        for candidate in &schema.tables {
            for foreign_key in &candidate.foreign_keys {
                if foreign_key.referenced_table == table_name
                    && foreign_key.referenced_schema == schema_name
                {
                    relationships.push(TableRelationship {
                        direction: RelationshipDirection::Inbound,
                        constraint_name: foreign_key.constraint_name.clone(),
                        source_column: foreign_key.referenced_column.clone(),
                        related_schema: schema_name.to_string(),
                        related_table: candidate.name.clone(),
                        related_column: foreign_key.column_name.clone(),
                    });
                }
            }
        }

        relationships.sort_unstable_by(|left, right| {
            left.related_schema
                .cmp(&right.related_schema)
                .then_with(|| left.related_table.cmp(&right.related_table))
                .then_with(|| left.related_column.cmp(&right.related_column))
                .then_with(|| left.constraint_name.cmp(&right.constraint_name))
                .then_with(|| left.direction.cmp(&right.direction))
        });

        relationships
    }
}

#[cfg(test)]
mod tests {
    use super::{
        ColumnSchema, DatabaseSchema, ForeignKeySchema, RelationshipDirection, SchemaNode,
        SchemaSnapshot, TableSchema,
    };
    use crate::ids::Generation;

    fn column(name: &str, data_type: &str) -> ColumnSchema {
        ColumnSchema {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: false,
            default_value: None,
        }
    }

    fn sample_snapshot() -> SchemaSnapshot {
        let users = TableSchema {
            columns: vec![column("id", "bigint"), column("email", "varchar(255)")],
            ..TableSchema::named("users")
        };
        let sessions = TableSchema {
            columns: vec![column("user_id", "bigint"), column("token", "text")],
            foreign_keys: vec![ForeignKeySchema {
                constraint_name: "fk_sessions_users".to_string(),
                column_name: "user_id".to_string(),
                referenced_schema: "public".to_string(),
                referenced_table: "users".to_string(),
                referenced_column: "id".to_string(),
            }],
            ..TableSchema::named("sessions")
        };

        SchemaSnapshot::new(
            Generation::default().next(),
            vec![
                DatabaseSchema {
                    name: "app".to_string(),
                    schemas: vec![SchemaNode {
                        name: "public".to_string(),
                        tables: vec![users, sessions],
                    }],
                },
                DatabaseSchema {
                    name: "analytics".to_string(),
                    schemas: vec![SchemaNode {
                        name: "analytics".to_string(),
                        tables: vec![TableSchema::named("events")],
                    }],
                },
            ],
            Vec::new(),
        )
    }

    #[test]
    fn lookups_walk_database_schema_and_table() {
        let snapshot = sample_snapshot();

        let users = snapshot
            .table("app", "public", "users")
            .expect("users should be present");
        assert_eq!(users.columns.len(), 2);
        assert!(snapshot.table("app", "missing", "users").is_none());
        assert_eq!(snapshot.table_count(), 3);
        assert_eq!(snapshot.generation(), Generation::default().next());
    }

    #[test]
    fn related_tables_returns_outbound_and_inbound_relationships() {
        let snapshot = sample_snapshot();

        let inbound = snapshot.related_tables("app", "public", "users");
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].direction, RelationshipDirection::Inbound);
        assert_eq!(inbound[0].related_table, "sessions");
        assert_eq!(inbound[0].related_column, "user_id");

        let outbound = snapshot.related_tables("app", "public", "sessions");
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].direction, RelationshipDirection::Outbound);
        assert_eq!(outbound[0].related_table, "users");
        assert_eq!(outbound[0].related_column, "id");
    }

    #[test]
    fn related_tables_for_unknown_schema_is_empty() {
        let snapshot = sample_snapshot();
        assert!(snapshot.related_tables("app", "nope", "users").is_empty());
    }
}
