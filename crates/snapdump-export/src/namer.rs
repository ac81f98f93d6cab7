//! Output file naming
//!
//! Renders output paths from user templates given the database, table and
//! chunk index. Callers append the format extension (`.sql`, `.csv`).

use serde::{Deserialize, Serialize};

use crate::ir::TableMeta;

/// Output kind a filename is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Database schema file
    Schema,
    /// Table schema file
    Table,
    /// View schema file
    View,
    /// Row data file
    Data,
}

/// Filename templates per output kind.
///
/// Placeholders: `{db}`, `{table}`, `{index}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct NameTemplates {
    /// Template for database schema files
    pub schema: String,
    /// Template for table schema files
    pub table: String,
    /// Template for view schema files
    pub view: String,
    /// Template for row data files
    pub data: String,
}

impl Default for NameTemplates {
    fn default() -> Self {
        Self {
            schema: "{db}-schema-create".to_string(),
            table: "{db}.{table}-schema".to_string(),
            view: "{db}.{table}-schema-view".to_string(),
            data: "{db}.{table}.{index}".to_string(),
        }
    }
}

impl NameTemplates {
    fn template(&self, kind: FileKind) -> &str {
        match kind {
            FileKind::Schema => &self.schema,
            FileKind::Table => &self.table,
            FileKind::View => &self.view,
            FileKind::Data => &self.data,
        }
    }
}

/// Renders filenames for one table (or database-level target).
///
/// The data index advances after each data-kind render, so rotated chunk
/// files get monotonically increasing names.
#[derive(Debug, Clone)]
pub struct OutputFileNamer {
    /// Chunk index substituted for `{index}`
    pub index: usize,
    /// Database name substituted for `{db}`
    pub db: String,
    /// Table name substituted for `{table}`
    pub table: String,
}

impl OutputFileNamer {
    /// Namer for a database-level file.
    pub fn for_database(db: impl Into<String>) -> Self {
        Self {
            index: 0,
            db: db.into(),
            table: String::new(),
        }
    }

    /// Namer for a table-level file.
    pub fn for_table(db: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            index: 0,
            db: db.into(),
            table: table.into(),
        }
    }

    /// Namer for a table's data files, starting at the given chunk index.
    pub fn for_chunk(meta: &dyn TableMeta, chunk_index: usize) -> Self {
        Self {
            index: chunk_index,
            db: meta.database_name().to_string(),
            table: meta.table_name().to_string(),
        }
    }

    /// Render a filename of the given kind.
    pub fn render(&self, templates: &NameTemplates, kind: FileKind) -> String {
        templates
            .template(kind)
            .replace("{db}", &self.db)
            .replace("{table}", &self.table)
            .replace("{index}", &self.index.to_string())
    }

    /// Render the next data filename and advance the chunk index.
    pub fn next_data_name(&mut self, templates: &NameTemplates) -> String {
        let name = self.render(templates, FileKind::Data);
        self.index += 1;
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_templates() {
        let templates = NameTemplates::default();
        let namer = OutputFileNamer::for_table("shop", "orders");

        assert_eq!(namer.render(&templates, FileKind::Schema), "shop-schema-create");
        assert_eq!(namer.render(&templates, FileKind::Table), "shop.orders-schema");
        assert_eq!(
            namer.render(&templates, FileKind::View),
            "shop.orders-schema-view"
        );
        assert_eq!(namer.render(&templates, FileKind::Data), "shop.orders.0");
    }

    #[test]
    fn test_data_index_advances_per_render() {
        let templates = NameTemplates::default();
        let mut namer = OutputFileNamer::for_table("shop", "orders");
        namer.index = 3;

        assert_eq!(namer.next_data_name(&templates), "shop.orders.3");
        assert_eq!(namer.next_data_name(&templates), "shop.orders.4");
        assert_eq!(namer.next_data_name(&templates), "shop.orders.5");
    }

    #[test]
    fn test_custom_template() {
        let templates = NameTemplates {
            data: "{db}/{table}/part-{index}".to_string(),
            ..Default::default()
        };
        let mut namer = OutputFileNamer::for_table("shop", "orders");
        assert_eq!(namer.next_data_name(&templates), "shop/orders/part-0");
    }
}
