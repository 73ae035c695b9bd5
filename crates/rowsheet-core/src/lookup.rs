//! Cross-document lookups backed by a [`TableStore`].

use crate::persistence::{TableStore, UserId};
use crate::storage::parse_csv;
use crate::table::TableView;
use dashmap::DashMap;
use rowsheet_engine::lookup::normalize_table_id;
use rowsheet_engine::{LookupTable, TableLookup};
use std::sync::Arc;

/// Resolves `table(":id")` references for one user, caching parsed tables.
pub struct StoreLookup {
    store: Arc<dyn TableStore>,
    owner: UserId,
    cache: DashMap<String, LookupTable>,
}

impl StoreLookup {
    pub fn new(store: Arc<dyn TableStore>, owner: UserId) -> Self {
        Self {
            store,
            owner,
            cache: DashMap::new(),
        }
    }

    /// Drop a cached table so the next lookup re-reads it.
    pub fn invalidate(&self, id: &str) {
        if let Some(id) = normalize_table_id(id) {
            self.cache.remove(id);
        }
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}

impl TableLookup for StoreLookup {
    fn lookup(&self, id: &str) -> Option<LookupTable> {
        let id = normalize_table_id(id)?;
        if let Some(table) = self.cache.get(id) {
            return Some(table.clone());
        }
        let record = match self.store.load(&self.owner, id) {
            Ok(record) => record,
            Err(err) => {
                tracing::debug!(%id, %err, "table lookup failed");
                return None;
            }
        };
        let view = TableView::from_grid(&parse_csv(&record.csv));
        let table = LookupTable {
            id: record.id,
            name: record.name,
            rows: view.all_row_fields(),
            columns: view.columns,
            footer: view.footer,
        };
        self.cache.insert(id.to_string(), table.clone());
        Some(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{CancellationToken, MemoryStore, TableUpdate};
    use rowsheet_engine::{EvalContext, FormulaValue, evaluate};

    fn setup() -> (Arc<MemoryStore>, UserId, String) {
        let store = Arc::new(MemoryStore::new());
        let owner = UserId::new("u");
        let record = store.create(&owner, Some("Prices")).unwrap();
        store
            .save(
                &owner,
                &record.id,
                &TableUpdate {
                    csv: Some("id,Item,Price\n1,tea,300\n,,".into()),
                    ..TableUpdate::default()
                },
                &CancellationToken::new(),
            )
            .unwrap();
        (store, owner, record.id)
    }

    #[test]
    fn test_lookup_parses_and_caches() {
        let (store, owner, id) = setup();
        let lookup = StoreLookup::new(store.clone(), owner.clone());
        let table = lookup.lookup(&format!(":{}", id)).unwrap();
        assert_eq!(table.name, "Prices");
        assert_eq!(table.columns, vec!["id", "Item", "Price"]);
        assert_eq!(table.rows[0].get("Price"), Some("300"));

        store.delete(&owner, &id).unwrap();
        assert!(lookup.lookup(&id).is_some());
        lookup.invalidate(&format!(":{}", id));
        assert!(lookup.lookup(&id).is_none());
    }

    #[test]
    fn test_lookup_is_scoped_to_owner() {
        let (store, _, id) = setup();
        let lookup = StoreLookup::new(store, UserId::new("someone-else"));
        assert!(lookup.lookup(&id).is_none());
        assert!(lookup.lookup(":").is_none());
    }

    #[test]
    fn test_formula_reads_other_table() {
        let (store, owner, id) = setup();
        let lookup: Arc<dyn TableLookup> = Arc::new(StoreLookup::new(store, owner));
        let ctx = EvalContext::default().with_lookup(Some(lookup));
        let formula = format!("% table(':{}').rows[0].values.Item", id);
        assert_eq!(evaluate(&formula, &ctx).value, FormulaValue::Text("tea".into()));
    }
}
