use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::{
    data::domain::{AuctionState, CotId, ProviderId, RenglonId},
    store::{
        AuctionRecord, EventLogRecord, LineItemCostsRecord, LineItemRecord, LineItemStateRecord,
        Store, StoreResult,
    },
    error::StoreError,
};

type ItemKey = (CotId, RenglonId);

#[derive(Debug, Default)]
struct Tables {
    auctions: BTreeMap<CotId, AuctionRecord>,
    line_items: BTreeMap<ItemKey, LineItemRecord>,
    line_item_states: BTreeMap<ItemKey, LineItemStateRecord>,
    line_item_costs: BTreeMap<ItemKey, LineItemCostsRecord>,
    event_log: Vec<EventLogRecord>,
    ui_config: BTreeMap<String, String>,
}

/// Reference [`Store`] keeping all tables in memory behind one mutex.
///
/// One writer at a time; every call commits atomically under the lock, which
/// is what gives readers the no-torn-state guarantee.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::WriteFailed("store mutex poisoned".to_string()))
    }
}

impl Store for MemoryStore {
    fn upsert_auction(&self, id_cot: &CotId, url: &str) -> StoreResult<()> {
        let mut tables = self.lock()?;
        tables
            .auctions
            .entry(id_cot.clone())
            .and_modify(|a| a.url = url.to_string())
            .or_insert_with(|| AuctionRecord {
                id_cot: id_cot.clone(),
                url: url.to_string(),
                state: AuctionState::Paused,
                started_at: None,
                ended_at: None,
                last_ok_at: None,
                last_http_code: None,
                err_streak: 0,
                our_provider_id: None,
            });
        Ok(())
    }

    fn auction(&self, id_cot: &CotId) -> StoreResult<Option<AuctionRecord>> {
        Ok(self.lock()?.auctions.get(id_cot).cloned())
    }

    fn set_auction_state(
        &self,
        id_cot: &CotId,
        state: AuctionState,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tables = self.lock()?;

        if state == AuctionState::Running {
            let other_running = tables
                .auctions
                .values()
                .any(|a| a.state == AuctionState::Running && &a.id_cot != id_cot);
            if other_running {
                return Err(StoreError::Constraint(format!(
                    "cannot run auction {id_cot}: another auction is already running"
                )));
            }
        }

        let auction = tables
            .auctions
            .get_mut(id_cot)
            .ok_or_else(|| StoreError::UnknownAuction(id_cot.to_string()))?;

        auction.state = state;
        match state {
            AuctionState::Running => {
                if auction.started_at.is_none() {
                    auction.started_at = Some(at);
                }
                auction.ended_at = None;
            }
            AuctionState::Ended => auction.ended_at = Some(at),
            AuctionState::Paused | AuctionState::Error => {}
        }
        Ok(())
    }

    fn record_auction_health(
        &self,
        id_cot: &CotId,
        last_http_code: u16,
        ok_at: Option<DateTime<Utc>>,
        err_streak: u32,
    ) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let auction = tables
            .auctions
            .get_mut(id_cot)
            .ok_or_else(|| StoreError::UnknownAuction(id_cot.to_string()))?;

        auction.last_http_code = Some(last_http_code);
        if let Some(at) = ok_at {
            auction.last_ok_at = Some(at);
        }
        auction.err_streak = err_streak;
        Ok(())
    }

    fn set_our_provider(&self, id_cot: &CotId, provider: &ProviderId) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let auction = tables
            .auctions
            .get_mut(id_cot)
            .ok_or_else(|| StoreError::UnknownAuction(id_cot.to_string()))?;
        auction.our_provider_id = Some(provider.clone());
        Ok(())
    }

    fn upsert_line_item(&self, item: &LineItemRecord) -> StoreResult<()> {
        let mut tables = self.lock()?;
        if !tables.auctions.contains_key(&item.id_cot) {
            return Err(StoreError::UnknownAuction(item.id_cot.to_string()));
        }
        tables
            .line_items
            .insert((item.id_cot.clone(), item.id_renglon.clone()), item.clone());
        Ok(())
    }

    fn line_items(&self, id_cot: &CotId) -> StoreResult<Vec<LineItemRecord>> {
        Ok(self
            .lock()?
            .line_items
            .values()
            .filter(|item| &item.id_cot == id_cot)
            .cloned()
            .collect())
    }

    fn upsert_line_item_state(&self, state: &LineItemStateRecord) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let key = (state.id_cot.clone(), state.id_renglon.clone());
        if !tables.line_items.contains_key(&key) {
            return Err(StoreError::UnknownLineItem(format!(
                "{}/{}",
                state.id_cot, state.id_renglon
            )));
        }
        tables.line_item_states.insert(key, state.clone());
        Ok(())
    }

    fn line_item_state(
        &self,
        id_cot: &CotId,
        id_renglon: &RenglonId,
    ) -> StoreResult<Option<LineItemStateRecord>> {
        Ok(self
            .lock()?
            .line_item_states
            .get(&(id_cot.clone(), id_renglon.clone()))
            .cloned())
    }

    fn upsert_costs(
        &self,
        id_cot: &CotId,
        id_renglon: &RenglonId,
        costs: &LineItemCostsRecord,
    ) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let key = (id_cot.clone(), id_renglon.clone());
        if !tables.line_items.contains_key(&key) {
            return Err(StoreError::UnknownLineItem(format!(
                "{id_cot}/{id_renglon}"
            )));
        }
        tables.line_item_costs.insert(key, costs.clone());
        Ok(())
    }

    fn costs(
        &self,
        id_cot: &CotId,
        id_renglon: &RenglonId,
    ) -> StoreResult<Option<LineItemCostsRecord>> {
        Ok(self
            .lock()?
            .line_item_costs
            .get(&(id_cot.clone(), id_renglon.clone()))
            .cloned())
    }

    fn append_event_log(&self, row: &EventLogRecord) -> StoreResult<()> {
        self.lock()?.event_log.push(row.clone());
        Ok(())
    }

    fn event_log_tail(&self, limit: usize) -> StoreResult<Vec<EventLogRecord>> {
        let tables = self.lock()?;
        let skip = tables.event_log.len().saturating_sub(limit);
        Ok(tables.event_log[skip..].to_vec())
    }

    fn set_ui_config(&self, key: &str, value: &str) -> StoreResult<()> {
        self.lock()?
            .ui_config
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn ui_config(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.lock()?.ui_config.get(key).cloned())
    }

    fn cleanup(&self, id_cot: &CotId) -> StoreResult<()> {
        let mut tables = self.lock()?;
        tables
            .line_item_states
            .retain(|(cot, _), _| cot != id_cot);
        tables
            .event_log
            .retain(|row| row.id_cot.as_ref() != Some(id_cot));
        Ok(())
    }

    fn delete_auction(&self, id_cot: &CotId) -> StoreResult<()> {
        let mut tables = self.lock()?;
        if tables.auctions.remove(id_cot).is_none() {
            return Err(StoreError::UnknownAuction(id_cot.to_string()));
        }
        tables.line_items.retain(|(cot, _), _| cot != id_cot);
        tables
            .line_item_states
            .retain(|(cot, _), _| cot != id_cot);
        tables
            .line_item_costs
            .retain(|(cot, _), _| cot != id_cot);
        Ok(())
    }
}
