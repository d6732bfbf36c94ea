//! Promise plumbing over the raw IndexedDB requests
//!
//! Request and transaction events are bridged to `js_sys::Promise` and awaited
//! with `wasm_bindgen_futures::JsFuture`. Rejections carry the
//! `DOMException` the engine reported so its name survives the trip.

use std::cell::RefCell;
use std::rc::Rc;

use idbkit_core::{EngineError, UpgradeFn, VersionChange};
use js_sys::Promise;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    DomException, IdbDatabase, IdbFactory, IdbObjectStore, IdbOpenDbRequest, IdbRequest,
    IdbTransaction, IdbTransactionMode, IdbVersionChangeEvent,
};

use crate::error::{IndexedDbError, Result};
use crate::upgrade::UpgradeTransaction;

type EventClosure = Closure<dyn FnMut(web_sys::Event)>;

/// Handlers kept alive until the open request settles
type OpenClosures = Rc<
    RefCell<
        Option<(
            Closure<dyn FnMut(IdbVersionChangeEvent)>,
            Closure<dyn FnMut(IdbVersionChangeEvent)>,
        )>,
    >,
>;

/// `indexedDB` from the global scope (window or worker).
pub fn idb_factory() -> Result<IdbFactory> {
    let global = js_sys::global();

    let idb: JsValue = js_sys::Reflect::get(&global, &"indexedDB".into())
        .map_err(|_| IndexedDbError::NotAvailable("no indexedDB on global".into()))?;

    if idb.is_undefined() || idb.is_null() {
        return Err(IndexedDbError::NotAvailable(
            "indexedDB is null/undefined".into(),
        ));
    }

    idb.dyn_into::<IdbFactory>()
        .map_err(|_| IndexedDbError::NotAvailable("indexedDB is not IdbFactory".into()))
}

fn request_error(req: &IdbRequest) -> JsValue {
    match req.error() {
        Ok(Some(err)) => err.into(),
        _ => js_sys::Error::new("unknown IndexedDB request error").into(),
    }
}

fn transaction_error(tx: &IdbTransaction) -> JsValue {
    match tx.error() {
        Some(err) => err.into(),
        None => DomException::new_with_message_and_name("transaction aborted", "AbortError")
            .map(JsValue::from)
            .unwrap_or_else(|err| err),
    }
}

/// Convert an IdbRequest into a JS Promise that settles with its next
/// success or error event.
///
/// A cursor request fires again after each `continue()`, so this may be called
/// repeatedly on the same request.
fn request_to_promise(req: &IdbRequest) -> Promise {
    let req = req.clone();

    Promise::new(&mut move |resolve, reject| {
        let closures: Rc<RefCell<Option<(EventClosure, EventClosure)>>> =
            Rc::new(RefCell::new(None));

        let req_s = req.clone();
        let closures_for_success = closures.clone();
        let on_success = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let result = req_s.result().unwrap_or(JsValue::UNDEFINED);
            let _ = resolve.call1(&JsValue::UNDEFINED, &result);
            *closures_for_success.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        let req_e = req.clone();
        let closures_for_error = closures.clone();
        let on_error = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let _ = reject.call1(&JsValue::UNDEFINED, &request_error(&req_e));
            *closures_for_error.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        req.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
        req.set_onerror(Some(on_error.as_ref().unchecked_ref()));

        *closures.borrow_mut() = Some((on_success, on_error));
    })
}

/// Promise that resolves on `complete` and rejects on `abort`.
fn transaction_to_promise(tx: &IdbTransaction) -> Promise {
    let tx = tx.clone();

    Promise::new(&mut move |resolve, reject| {
        let closures: Rc<RefCell<Option<(EventClosure, EventClosure)>>> =
            Rc::new(RefCell::new(None));

        let closures_for_complete = closures.clone();
        let on_complete = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let _ = resolve.call0(&JsValue::UNDEFINED);
            *closures_for_complete.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        // Errors bubble up as an abort, so one handler covers both.
        let tx_a = tx.clone();
        let closures_for_abort = closures.clone();
        let on_abort = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let _ = reject.call1(&JsValue::UNDEFINED, &transaction_error(&tx_a));
            *closures_for_abort.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        tx.set_oncomplete(Some(on_complete.as_ref().unchecked_ref()));
        tx.set_onabort(Some(on_abort.as_ref().unchecked_ref()));

        *closures.borrow_mut() = Some((on_complete, on_abort));
    })
}

/// The request's `result` once it succeeds.
pub async fn await_request(req: &IdbRequest) -> Result<JsValue> {
    JsFuture::from(request_to_promise(req))
        .await
        .map_err(IndexedDbError::from)
}

/// Resolves once the transaction has committed.
pub async fn await_transaction(tx: &IdbTransaction) -> Result<()> {
    JsFuture::from(transaction_to_promise(tx))
        .await
        .map_err(IndexedDbError::from)?;
    Ok(())
}

/// Open `name` at `version`, running `upgrade` inside the versionchange
/// transaction when the stored version is lower.
///
/// Resolves only after the upgrade transaction has committed. If `upgrade`
/// fails the transaction is aborted and its error is returned.
pub async fn open_database(name: &str, version: u32, mut upgrade: UpgradeFn) -> Result<IdbDatabase> {
    let factory = idb_factory()?;

    let open_req: IdbOpenDbRequest = factory.open_with_u32(name, version)?;

    let failure: Rc<RefCell<Option<EngineError>>> = Rc::new(RefCell::new(None));
    let closures: OpenClosures = Rc::new(RefCell::new(None));

    let req_for_upgrade = open_req.clone();
    let failure_for_upgrade = failure.clone();
    let on_upgrade = Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
        let change = VersionChange {
            old_version: event.old_version() as u32,
            new_version: event.new_version().map_or(version, |v| v as u32),
        };
        let outcome = UpgradeTransaction::from_request(&req_for_upgrade)
            .map_err(EngineError::from)
            .and_then(|mut ctx| upgrade(&mut ctx, change));
        if let Err(err) = outcome {
            tracing::warn!(error = %err, "upgrade failed, aborting");
            if let Some(tx) = req_for_upgrade.transaction() {
                let _ = tx.abort();
            }
            *failure_for_upgrade.borrow_mut() = Some(err);
        }
    }) as Box<dyn FnMut(IdbVersionChangeEvent)>);

    let db_name = name.to_string();
    let on_blocked = Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
        tracing::warn!(
            database = %db_name,
            old_version = event.old_version(),
            "open blocked by another connection"
        );
    }) as Box<dyn FnMut(IdbVersionChangeEvent)>);

    open_req.set_onupgradeneeded(Some(on_upgrade.as_ref().unchecked_ref()));
    open_req.set_onblocked(Some(on_blocked.as_ref().unchecked_ref()));
    *closures.borrow_mut() = Some((on_upgrade, on_blocked));

    let result = await_request(open_req.unchecked_ref()).await;

    open_req.set_onupgradeneeded(None);
    open_req.set_onblocked(None);
    *closures.borrow_mut() = None;

    let upgrade_failure = failure.borrow_mut().take();
    match (result, upgrade_failure) {
        (_, Some(err)) => {
            // Could not abort: the open went through without the schema.
            if let Ok(db) = open_req.result().and_then(|db| db.dyn_into::<IdbDatabase>()) {
                db.close();
            }
            Err(IndexedDbError::Upgrade(err))
        }
        (Err(err), None) => Err(err),
        (Ok(db), None) => db
            .dyn_into::<IdbDatabase>()
            .map_err(|_| IndexedDbError::JsValue("open result is not IdbDatabase".into())),
    }
}

/// Start a single-store transaction and return its object store.
pub fn begin_transaction(
    db: &IdbDatabase,
    store: &str,
    mode: IdbTransactionMode,
) -> Result<(IdbTransaction, IdbObjectStore)> {
    let tx = db.transaction_with_str_and_mode(store, mode)?;
    let store = tx.object_store(store)?;
    Ok((tx, store))
}

/// Delete an IndexedDB database by name. Deleting a missing database succeeds.
pub async fn delete_database(name: &str) -> Result<()> {
    let factory = idb_factory()?;
    let req = factory.delete_database(name)?;
    await_request(req.unchecked_ref()).await?;
    Ok(())
}
