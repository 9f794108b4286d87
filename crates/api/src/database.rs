//! The database handle and CRUD router
//!
//! [`Db`] is the public surface: the five verbs (`add`, `get`/`get_all`,
//! `set`, `del`, `subscribe`), the transaction verbs (`rec`, `fin`,
//! `nop`, `pop`, `txn_status`), and the internal update path `save`
//! flushes through. Every verb validates its collection name, runs the
//! middleware chain, then drives the engine.
//!
//! Mutating verbs are serialised per handle through a reentrant operation
//! lock — at most one in-flight CRUD mutation, committed and observed in
//! call order. Readers snapshot the engine without taking that lock.
//!
//! While a transaction is recording, mutations buffer into it instead of
//! touching the store, and reads consult the buffered overlay first.

use crate::document::Document;
use crate::middleware::{run_chain, Middleware, OpContext, Operation};
use crate::options::OpOptions;
use crate::query::{is_match, Filter, Selector};
use bri_core::document::{CREATED_AT, DELETED_AT, DELETED_BY, ID_FIELD, UPDATED_AT};
use bri_core::event::channel_for;
use bri_core::id::{check_type, new_id, tombstone_key, type_of, validate_collection_name};
use bri_core::{document, jss, Action, ChangeEvent, DbConfig, Error, Result};
use bri_durability::snapshot::SnapshotInfo;
use bri_durability::wal::WalOp;
use bri_engine::{EngineStats, KvEngine, Subscription, TxnAction, TxnRecorder, TxnStatusInfo, TxnSummary};
use parking_lot::{ReentrantMutex, RwLock};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

struct DbInner {
    engine: Arc<KvEngine>,
    txns: TxnRecorder,
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
    /// Per-handle operation queue: one in-flight mutation at a time.
    /// Reentrant so subscribers may issue follow-up mutations inline.
    op_lock: ReentrantMutex<()>,
}

/// A database handle. Cheap to clone; clones share the same engine.
#[derive(Clone)]
pub struct Db {
    inner: Arc<DbInner>,
}

impl Db {
    /// Open (or create) a database at `config.data_dir`, replaying any
    /// prior state.
    pub fn open(config: DbConfig) -> Result<Db> {
        let engine = KvEngine::open(config)?;
        Ok(Db {
            inner: Arc::new(DbInner {
                engine,
                txns: TxnRecorder::new(),
                middleware: RwLock::new(Vec::new()),
                op_lock: ReentrantMutex::new(()),
            }),
        })
    }

    /// Append a middleware to the chain. Order of registration is order
    /// of invocation.
    pub fn use_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.inner.middleware.write().push(middleware);
    }

    /// Create a document.
    ///
    /// `data` must be a JSON object without an `$ID`; the router generates
    /// the id and stamps `createdAt`/`updatedAt`.
    pub fn add(&self, name: &str, data: Value, opts: OpOptions) -> Result<Document> {
        let collection = self.singular(name)?;
        let object = data
            .as_object()
            .ok_or_else(|| Error::serialization("add data must be a JSON object"))?;
        if let Some(existing) = object.get(ID_FIELD) {
            return Err(Error::DuplicateAdd {
                id: existing.as_str().unwrap_or_default().to_string(),
            });
        }

        let _guard = self.inner.op_lock.lock();
        let type_name = collection.type_name.clone();
        let set_key = collection.set_key();
        let mut ctx = OpContext {
            operation: Operation::Add,
            type_name: type_name.clone(),
            args: data,
            opts,
            result: None,
        };

        self.run(&mut ctx, |db, ctx| {
            let mut doc = ctx
                .args
                .as_object()
                .cloned()
                .ok_or_else(|| Error::serialization("add data must be a JSON object"))?;
            let id = new_id(&type_name);
            let now = document::now();
            doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            doc.insert(CREATED_AT.to_string(), Value::String(now.clone()));
            doc.insert(UPDATED_AT.to_string(), Value::String(now));
            let value = Value::Object(doc);
            jss::ensure_encodable(&value)?;

            let mut event = ChangeEvent::new(Action::Add, id.clone());
            event.actor = ctx.opts.save_by.resolve(&id);
            event.tag = ctx.opts.tag.clone();

            db.commit_action(
                TxnAction {
                    ops: vec![
                        WalOp::Set {
                            key: id.clone(),
                            value: serde_json::to_string(&value)?,
                        },
                        WalOp::SAdd {
                            set_key: set_key.clone(),
                            member: id,
                        },
                    ],
                    event,
                    prev: None,
                },
                &ctx.opts,
            )?;

            ctx.result = Some(value);
            Ok(())
        })?;

        Document::from_value(ctx.result.expect("add produces a result"))
    }

    /// Singular read.
    ///
    /// A string (or `{$ID}`) selector fetches by key after a type check;
    /// a query object or predicate scans the collection set and returns
    /// the first match. Tombstoned and absent documents read as `None`.
    pub fn get(&self, name: &str, selector: impl Into<Selector>) -> Result<Option<Document>> {
        let collection = self.singular(name)?;
        let selector = selector.into();

        let args = match &selector {
            Selector::Id(id) => serde_json::json!({ "$ID": id }),
            Selector::Query(query) => query.clone(),
            _ => Value::Null,
        };
        let mut ctx = OpContext {
            operation: Operation::Get,
            type_name: collection.type_name.clone(),
            args,
            opts: OpOptions::default(),
            result: None,
        };

        let type_name = collection.type_name.clone();
        let set_key = collection.set_key();
        self.run(&mut ctx, |db, ctx| {
            let found = match &selector {
                Selector::Missing => return Err(Error::MissingSelector),
                Selector::Id(id) => {
                    check_type(id, &type_name)?;
                    db.load_doc(id)?
                }
                Selector::Query(query) => db.scan_first(&set_key, |doc| is_match(doc, query))?,
                Selector::Predicate(test) => db.scan_first(&set_key, test)?,
            };
            ctx.result = found;
            Ok(())
        })?;

        ctx.result.map(Document::from_value).transpose()
    }

    /// Fetch a document by bare id, deriving the type from its prefix.
    pub fn get_by_id(&self, id: &str) -> Result<Option<Document>> {
        let type_name = type_of(id)?.to_lowercase();
        self.get(&type_name, Selector::Id(id.to_string()))
    }

    /// Group read: every live document of the type, optionally filtered
    /// by exact deep match or predicate.
    pub fn get_all(&self, name: &str, filter: Filter) -> Result<Vec<Document>> {
        let collection = validate_collection_name(name)?;

        let args = match &filter {
            Filter::Query(query) => query.clone(),
            _ => Value::Null,
        };
        let mut ctx = OpContext {
            operation: Operation::GetAll,
            type_name: collection.type_name.clone(),
            args,
            opts: OpOptions::default(),
            result: None,
        };

        let set_key = collection.set_key();
        self.run(&mut ctx, |db, ctx| {
            let mut found = Vec::new();
            for id in db.members(&set_key)? {
                let Some(doc) = db.load_doc(&id)? else {
                    warn!(target: "bri::crud", id = %id, "set member has no document");
                    continue;
                };
                let keep = match &filter {
                    Filter::All => true,
                    Filter::Query(query) => is_match(&doc, query),
                    Filter::Predicate(test) => test(&doc),
                };
                if keep {
                    found.push(doc);
                }
            }
            ctx.result = Some(Value::Array(found));
            Ok(())
        })?;

        match ctx.result {
            Some(Value::Array(values)) => {
                values.into_iter().map(Document::from_value).collect()
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Wholesale replacement.
    ///
    /// Requires a matching `$ID` on `data` and an existing document.
    /// `createdAt` is preserved from the original; every other field is
    /// overwritten by `data`.
    pub fn set(&self, name: &str, data: Value, opts: OpOptions) -> Result<Document> {
        let collection = self.singular(name)?;
        let id = data
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::bad_id("<set data without $ID>"))?
            .to_string();
        check_type(&id, &collection.type_name)?;

        let _guard = self.inner.op_lock.lock();
        let mut ctx = OpContext {
            operation: Operation::Set,
            type_name: collection.type_name.clone(),
            args: data,
            opts,
            result: None,
        };

        self.run(&mut ctx, |db, ctx| {
            let existing = db
                .load_doc(&id)?
                .ok_or_else(|| Error::not_found(id.as_str()))?;

            let mut doc = ctx
                .args
                .as_object()
                .cloned()
                .ok_or_else(|| Error::serialization("set data must be a JSON object"))?;
            doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            if let Some(created_at) = existing.get(CREATED_AT) {
                doc.insert(CREATED_AT.to_string(), created_at.clone());
            }
            doc.insert(
                UPDATED_AT.to_string(),
                Value::String(document::now()),
            );
            let value = Value::Object(doc);
            jss::ensure_encodable(&value)?;

            let mut event = ChangeEvent::new(Action::Set, id.clone());
            event.actor = ctx.opts.save_by.resolve(&id);
            event.tag = ctx.opts.tag.clone();

            db.commit_action(
                TxnAction {
                    ops: vec![WalOp::Set {
                        key: id.clone(),
                        value: serde_json::to_string(&value)?,
                    }],
                    event,
                    prev: Some(serde_json::to_string(&existing)?),
                },
                &ctx.opts,
            )?;

            ctx.result = Some(value);
            Ok(())
        })?;

        Document::from_value(ctx.result.expect("set produces a result"))
    }

    /// Soft-delete.
    ///
    /// Stamps `deletedAt`/`deletedBy` onto the stored copy, renames the
    /// key to its tombstone, and removes the id from the collection set.
    /// Returns the pre-tombstone document without the tombstone fields.
    /// A missing `deleted_by` logs a warning but the delete proceeds.
    pub fn del(
        &self,
        name: &str,
        selector: impl Into<Selector>,
        deleted_by: Option<&str>,
    ) -> Result<Document> {
        let collection = self.singular(name)?;
        let id = match selector.into() {
            Selector::Id(id) => id,
            _ => return Err(Error::MissingSelector),
        };
        check_type(&id, &collection.type_name)?;

        let _guard = self.inner.op_lock.lock();
        let set_key = collection.set_key();
        let mut ctx = OpContext {
            operation: Operation::Del,
            type_name: collection.type_name.clone(),
            args: serde_json::json!({ "$ID": id }),
            opts: OpOptions::default(),
            result: None,
        };

        let actor = deleted_by.map(str::to_string);
        self.run(&mut ctx, |db, ctx| {
            let existing = db
                .load_doc(&id)?
                .ok_or_else(|| Error::not_found(id.as_str()))?;

            if actor.is_none() {
                warn!(target: "bri::crud", id = %id, "del without a deletedBy actor");
            }

            let mut stamped = existing
                .as_object()
                .cloned()
                .expect("stored documents are objects");
            stamped.insert(
                DELETED_AT.to_string(),
                Value::String(document::now()),
            );
            stamped.insert(
                DELETED_BY.to_string(),
                actor.clone().map(Value::String).unwrap_or(Value::Null),
            );

            let mut event = ChangeEvent::new(Action::Del, id.clone());
            event.actor = actor.clone();

            db.commit_action(
                TxnAction {
                    ops: vec![
                        WalOp::Set {
                            key: id.clone(),
                            value: serde_json::to_string(&Value::Object(stamped))?,
                        },
                        WalOp::Rename {
                            old_key: id.clone(),
                            new_key: tombstone_key(&id),
                        },
                        WalOp::SRem {
                            set_key: set_key.clone(),
                            member: id.clone(),
                        },
                    ],
                    event,
                    prev: Some(serde_json::to_string(&existing)?),
                },
                &ctx.opts,
            )?;

            // Returned value never carries the tombstone fields
            let mut returned = existing
                .as_object()
                .cloned()
                .expect("stored documents are objects");
            returned.remove(DELETED_AT);
            returned.remove(DELETED_BY);
            ctx.result = Some(Value::Object(returned));
            Ok(())
        })?;

        Document::from_value(ctx.result.expect("del produces a result"))
    }

    /// Subscribe to the change channel of a type (`db:sub:<type>`).
    pub fn subscribe(
        &self,
        name: &str,
        listener: impl Fn(&ChangeEvent) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let collection = self.singular(name)?;
        Ok(self
            .inner
            .engine
            .subscribe(&channel_for(&collection.type_name), listener))
    }

    /// Internal update path, reached from `Document::save`.
    ///
    /// Merges the change set into the stored original by top-level key —
    /// assignments replace, `None` entries remove — refreshes `updatedAt`,
    /// persists, and broadcasts a `save` event carrying the diff.
    pub(crate) fn update(
        &self,
        id: &str,
        changes: Vec<(String, Option<Value>)>,
        opts: OpOptions,
    ) -> Result<Document> {
        let type_name = type_of(id)?.to_lowercase();

        let mut diff = Map::new();
        let mut removals = BTreeSet::new();
        for (key, value) in changes {
            match value {
                Some(value) => {
                    diff.insert(key, value);
                }
                None => {
                    diff.insert(key.clone(), Value::Null);
                    removals.insert(key);
                }
            }
        }

        let _guard = self.inner.op_lock.lock();
        let mut ctx = OpContext {
            operation: Operation::Save,
            type_name,
            args: Value::Object(diff),
            opts,
            result: None,
        };

        self.run(&mut ctx, |db, ctx| {
            let existing = db.load_doc(id)?.ok_or_else(|| Error::not_found(id))?;
            let mut doc = existing
                .as_object()
                .cloned()
                .expect("stored documents are objects");

            let diff = ctx
                .args
                .as_object()
                .cloned()
                .ok_or_else(|| Error::serialization("save diff must be a JSON object"))?;
            for (key, value) in &diff {
                if bri_core::document::is_immutable_field(key) {
                    continue;
                }
                if removals.contains(key) {
                    doc.remove(key);
                } else {
                    doc.insert(key.clone(), value.clone());
                }
            }
            doc.insert(
                UPDATED_AT.to_string(),
                Value::String(document::now()),
            );
            let value = Value::Object(doc);
            jss::ensure_encodable(&value)?;

            let mut event = ChangeEvent::new(Action::Save, id.to_string());
            event.actor = ctx.opts.save_by.resolve(id);
            event.tag = ctx.opts.tag.clone();
            event.diff = Some(ctx.args.clone());

            db.commit_action(
                TxnAction {
                    ops: vec![WalOp::Set {
                        key: id.to_string(),
                        value: serde_json::to_string(&value)?,
                    }],
                    event,
                    prev: Some(serde_json::to_string(&existing)?),
                },
                &ctx.opts,
            )?;

            ctx.result = Some(value);
            Ok(())
        })?;

        Document::from_value(ctx.result.expect("save produces a result"))
    }

    // ========== Transaction verbs ==========

    /// Start recording a transaction. At most one per handle.
    pub fn rec(&self) -> Result<String> {
        self.inner.txns.rec()
    }

    /// Commit: flush the buffered actions as one atomic batch behind a
    /// single WAL barrier, then broadcast their events in order.
    pub fn fin(&self, txn_id: Option<&str>) -> Result<TxnSummary> {
        let _guard = self.inner.op_lock.lock();
        let (actions, summary) = self.inner.txns.fin(txn_id)?;
        let ops: Vec<WalOp> = actions
            .iter()
            .flat_map(|action| action.ops.iter().cloned())
            .collect();
        self.inner.engine.apply_batch(ops)?;
        for action in &actions {
            self.publish_event(&action.event);
        }
        Ok(summary)
    }

    /// Roll back: discard the buffered actions; no state change is visible.
    pub fn nop(&self, txn_id: Option<&str>) -> Result<()> {
        self.inner.txns.nop(txn_id)?;
        Ok(())
    }

    /// Remove and return the most recently buffered action.
    pub fn pop(&self, txn_id: Option<&str>) -> Result<Option<TxnAction>> {
        self.inner.txns.pop(txn_id)
    }

    /// Status of the active (or a finished) transaction.
    pub fn txn_status(&self, txn_id: Option<&str>) -> Result<TxnStatusInfo> {
        self.inner.txns.status(txn_id)
    }

    // ========== Engine passthrough ==========

    /// Engine counters.
    pub fn stats(&self) -> Result<EngineStats> {
        self.inner.engine.stats()
    }

    /// Force a snapshot now. `None` when nothing changed since the last.
    pub fn create_snapshot(&self) -> Result<Option<SnapshotInfo>> {
        self.inner.engine.create_snapshot()
    }

    /// Flush everything, write a final snapshot, and close the engine.
    pub fn disconnect(&self) -> Result<()> {
        self.inner.engine.disconnect()
    }

    // ========== Internals ==========

    fn singular(&self, name: &str) -> Result<bri_core::id::CollectionName> {
        let collection = validate_collection_name(name)?;
        if collection.group {
            // Group names only make sense on group reads
            return Err(Error::bad_collection_name(name));
        }
        Ok(collection)
    }

    /// Run the middleware chain around a terminal store operation.
    fn run(
        &self,
        ctx: &mut OpContext,
        terminal: impl Fn(&Db, &mut OpContext) -> Result<()>,
    ) -> Result<()> {
        let middlewares = self.inner.middleware.read().clone();
        let db = self.clone();
        run_chain(&middlewares, ctx, &mut |ctx| terminal(&db, ctx))
    }

    /// Buffer the action into the active transaction, or apply and
    /// broadcast it immediately.
    fn commit_action(&self, action: TxnAction, opts: &OpOptions) -> Result<()> {
        if self.inner.txns.is_active() || opts.txn_id.is_some() {
            return self.inner.txns.record(opts.txn_id.as_deref(), action);
        }
        self.inner.engine.apply_batch(action.ops.clone())?;
        self.publish_event(&action.event);
        Ok(())
    }

    fn publish_event(&self, event: &ChangeEvent) {
        match type_of(&event.target) {
            Ok(type_name) => self
                .inner
                .engine
                .publish(&channel_for(type_name), event),
            Err(_) => warn!(
                target: "bri::crud",
                target_id = %event.target,
                "event target has no type; not broadcast"
            ),
        }
    }

    /// Load a parsed document, consulting the transaction overlay first.
    fn load_doc(&self, key: &str) -> Result<Option<Value>> {
        let raw = match self.inner.txns.overlay_doc(key) {
            Some(Some(value)) => Some(value),
            Some(None) => None,
            None => self.inner.engine.get(key)?,
        };
        raw.map(|text| serde_json::from_str(&text).map_err(Into::into))
            .transpose()
    }

    /// Collection members, overlay-aware, in sorted order.
    fn members(&self, set_key: &str) -> Result<Vec<String>> {
        let mut members: BTreeSet<String> = self.inner.engine.member_set(set_key)?;
        self.inner.txns.overlay_members(set_key, &mut members);
        Ok(members.into_iter().collect())
    }

    /// First collection member whose document passes `test`.
    fn scan_first(
        &self,
        set_key: &str,
        test: impl Fn(&Value) -> bool,
    ) -> Result<Option<Value>> {
        for id in self.members(set_key)? {
            if let Some(doc) = self.load_doc(&id)? {
                if test(&doc) {
                    return Ok(Some(doc));
                }
            }
        }
        Ok(None)
    }
}
