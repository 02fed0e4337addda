//! User Dimension Builder - distinct customer ids, ascending

use crate::error::Result;
use crate::model::UserRow;
use crate::store::IntermediateStore;
use std::collections::BTreeSet;
use tracing::info;

pub fn build_user_dimension(store: &IntermediateStore) -> Result<Vec<UserRow>> {
    let mut ids: BTreeSet<i64> = BTreeSet::new();
    for record in store.scan()? {
        ids.insert(record?.customer_id);
    }

    let users: Vec<UserRow> = ids
        .into_iter()
        .map(|customer_id| UserRow { customer_id })
        .collect();
    info!(users = users.len(), "User dimension built");
    Ok(users)
}
