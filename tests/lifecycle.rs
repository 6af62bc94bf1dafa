use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use jobtrail::models::{ApplicationStatus, DerivedStatus, NewApplication, StageStatus, Tenant};
use jobtrail::{Database, StageEngine};
use tempfile::TempDir;

struct Store {
    _dir: TempDir,
    path: std::path::PathBuf,
}

impl Store {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobtrail.db");
        Database::open(&path).unwrap().init().unwrap();
        Self { _dir: dir, path }
    }

    fn connect(&self) -> Database {
        Database::open(&self.path).unwrap()
    }
}

fn application(db: &Database, tenant: &Tenant, company: &str) -> i64 {
    let job = db.add_job(tenant, Some(company), "Engineer", None).unwrap();
    db.create_application(tenant, NewApplication { job_id: job, ..Default::default() })
        .unwrap()
        .id
}

/// Checks the current-stage invariants for one application.
fn assert_pointer_invariants(db: &Database, tenant: &Tenant, application_id: i64) {
    let app = db.get_application(tenant, application_id).unwrap();
    let stages = StageEngine::new(db).list_stages(tenant, application_id).unwrap();
    match app.current_stage_id {
        None => assert!(stages.is_empty(), "stages exist but pointer is null"),
        Some(id) => assert!(
            stages.iter().any(|s| s.id == id),
            "pointer #{id} does not reference a stage of application #{application_id}"
        ),
    }
}

fn open_at(path: &Path) -> Database {
    Database::open(path).unwrap()
}

#[test]
fn scenario_walkthrough_on_a_file_database() {
    let store = Store::new();
    let db = store.connect();
    let tenant = Tenant::new("alice");
    let app = application(&db, &tenant, "Acme");
    let applied = db.create_template(&tenant, "Applied", 1).unwrap().id;
    let screening = db.create_template(&tenant, "Screening", 2).unwrap().id;
    let engine = StageEngine::new(&db);

    let a = engine.append_stage(&tenant, app, applied, None).unwrap();
    assert_eq!((a.order, a.status), (0, StageStatus::Active));
    assert_pointer_invariants(&db, &tenant, app);

    let s = engine
        .append_stage(&tenant, app, screening, Some("recruiter call booked"))
        .unwrap();
    assert_eq!((s.order, s.status), (1, StageStatus::Active));
    assert_eq!(db.get_application(&tenant, app).unwrap().current_stage_id, Some(s.id));

    // a second connection sees the committed state
    let other = open_at(&store.path);
    let a_seen = StageEngine::new(&other).get_stage(&tenant, app, a.id).unwrap();
    assert_eq!(a_seen.status, StageStatus::Completed);
    assert!(a_seen.completed_at.is_some());

    engine.delete_stage(&tenant, app, s.id).unwrap();
    assert_eq!(db.get_application(&tenant, app).unwrap().current_stage_id, Some(a.id));
    assert_pointer_invariants(&db, &tenant, app);

    let a = engine
        .update_stage_status(&tenant, app, a.id, "active", None)
        .unwrap();
    assert_eq!(a.completed_at, None);

    engine.delete_stage(&tenant, app, a.id).unwrap();
    assert_eq!(db.get_application(&tenant, app).unwrap().current_stage_id, None);
    assert_pointer_invariants(&db, &tenant, app);
}

#[test]
fn company_status_follows_stage_history() {
    let store = Store::new();
    let db = store.connect();
    let tenant = Tenant::new("alice");
    let company = db.get_or_create_company(&tenant, "Acme").unwrap();
    let applied = db.create_template(&tenant, "Applied", 1).unwrap().id;
    let screening = db.create_template(&tenant, "Screening", 2).unwrap().id;

    let summary = db.company_summary(&tenant, company).unwrap().unwrap();
    assert_eq!(summary.derived_status, DerivedStatus::Idle);

    let app = application(&db, &tenant, "Acme");
    let summary = db.company_summary(&tenant, company).unwrap().unwrap();
    assert_eq!(summary.counts.applications, 1);
    assert_eq!(summary.derived_status, DerivedStatus::Active);

    // interviewing wins even when the application is no longer active
    db.set_application_status(&tenant, app, "on_hold").unwrap();
    let engine = StageEngine::new(&db);
    engine.append_stage(&tenant, app, applied, None).unwrap();
    let s = engine.append_stage(&tenant, app, screening, None).unwrap();
    let summary = db.company_summary(&tenant, company).unwrap().unwrap();
    assert_eq!(summary.counts.active_applications, 0);
    assert_eq!(summary.counts.max_stages, 2);
    assert_eq!(summary.derived_status, DerivedStatus::Interviewing);

    // recomputed on read: dropping back to one stage of an inactive application
    engine.delete_stage(&tenant, app, s.id).unwrap();
    let summary = db.company_summary(&tenant, company).unwrap().unwrap();
    assert_eq!(summary.derived_status, DerivedStatus::Idle);
}

#[test]
fn company_counts_span_jobs_and_ignore_other_tenants() {
    let store = Store::new();
    let db = store.connect();
    let alice = Tenant::new("alice");
    let bob = Tenant::new("bob");

    application(&db, &alice, "Acme");
    let second = application(&db, &alice, "Acme");
    db.set_application_status(&alice, second, "rejected").unwrap();
    application(&db, &bob, "Acme");

    let summaries = db.company_summaries(&alice).unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].counts.applications, 2);
    assert_eq!(summaries[0].counts.active_applications, 1);
    assert_eq!(summaries[0].derived_status, DerivedStatus::Active);
}

#[test]
fn concurrent_appends_serialize_per_application() {
    const WORKERS: usize = 4;
    const APPENDS: usize = 8;

    let store = Store::new();
    let tenant = Tenant::new("alice");
    let (app, template) = {
        let db = store.connect();
        let app = application(&db, &tenant, "Acme");
        let template = db.create_template(&tenant, "Interview", 3).unwrap().id;
        (app, template)
    };

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let path = store.path.clone();
            let tenant = tenant.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let db = open_at(&path);
                let engine = StageEngine::new(&db);
                barrier.wait();
                for _ in 0..APPENDS {
                    engine.append_stage(&tenant, app, template, None).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let db = store.connect();
    let stages = StageEngine::new(&db).list_stages(&tenant, app).unwrap();
    assert_eq!(stages.len(), WORKERS * APPENDS);

    let mut orders: Vec<i64> = stages.iter().map(|s| s.order).collect();
    orders.sort_unstable();
    let expected: Vec<i64> = (0..(WORKERS * APPENDS) as i64).collect();
    assert_eq!(orders, expected, "orders must be unique and gap-free");

    let active: Vec<_> = stages
        .iter()
        .filter(|s| s.status == StageStatus::Active)
        .collect();
    assert_eq!(active.len(), 1);
    let newest = stages.iter().max_by_key(|s| s.id).unwrap();
    assert_eq!(active[0].id, newest.id);
    assert_eq!(
        db.get_application(&tenant, app).unwrap().current_stage_id,
        Some(newest.id)
    );
}

#[test]
fn concurrent_appends_and_deletes_keep_the_pointer_valid() {
    let store = Store::new();
    let tenant = Tenant::new("alice");
    let (app, template) = {
        let db = store.connect();
        let app = application(&db, &tenant, "Acme");
        let template = db.create_template(&tenant, "Applied", 1).unwrap().id;
        (app, template)
    };

    let barrier = Arc::new(Barrier::new(2));
    let appender = {
        let path = store.path.clone();
        let tenant = tenant.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let db = open_at(&path);
            let engine = StageEngine::new(&db);
            barrier.wait();
            for _ in 0..20 {
                engine.append_stage(&tenant, app, template, None).unwrap();
            }
        })
    };
    let deleter = {
        let path = store.path.clone();
        let tenant = tenant.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let db = open_at(&path);
            let engine = StageEngine::new(&db);
            barrier.wait();
            for _ in 0..20 {
                let current = db.get_application(&tenant, app).unwrap().current_stage_id;
                if let Some(stage_id) = current {
                    // the appender may have moved on; a vanished stage is fine
                    match engine.delete_stage(&tenant, app, stage_id) {
                        Ok(()) => {}
                        Err(e) => assert!(e.is_not_found(), "unexpected error: {e}"),
                    }
                }
                // only this thread deletes, so a non-null pointer must resolve
                if let Some(id) = db.get_application(&tenant, app).unwrap().current_stage_id {
                    assert!(engine.get_stage(&tenant, app, id).is_ok());
                }
            }
        })
    };
    appender.join().unwrap();
    deleter.join().unwrap();

    let db = store.connect();
    assert_pointer_invariants(&db, &tenant, app);
}

#[test]
fn appends_never_fail_while_another_worker_deletes() {
    const APPENDS: usize = 200;

    let store = Store::new();
    let tenant = Tenant::new("alice");
    let (app, template) = {
        let db = store.connect();
        let app = application(&db, &tenant, "Acme");
        let template = db.create_template(&tenant, "Applied", 1).unwrap().id;
        (app, template)
    };

    let done = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(2));
    let appender = {
        let path = store.path.clone();
        let tenant = tenant.clone();
        let barrier = Arc::clone(&barrier);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let db = open_at(&path);
            let engine = StageEngine::new(&db);
            barrier.wait();
            let mut failures = Vec::new();
            for i in 0..APPENDS {
                match engine.append_stage(&tenant, app, template, Some("follow-up sent")) {
                    Ok(stage) => assert_eq!(stage.application_id, app),
                    Err(e) => failures.push(format!("append {i}: {e}")),
                }
            }
            done.store(true, Ordering::SeqCst);
            failures
        })
    };
    let deleter = {
        let path = store.path.clone();
        let tenant = tenant.clone();
        let barrier = Arc::clone(&barrier);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let db = open_at(&path);
            let engine = StageEngine::new(&db);
            barrier.wait();
            let mut deleted = 0;
            while !done.load(Ordering::SeqCst) {
                let current = db.get_application(&tenant, app).unwrap().current_stage_id;
                if let Some(stage_id) = current {
                    match engine.delete_stage(&tenant, app, stage_id) {
                        Ok(()) => deleted += 1,
                        Err(e) => assert!(e.is_not_found(), "unexpected delete error: {e}"),
                    }
                }
            }
            deleted
        })
    };
    let failures = appender.join().unwrap();
    let deleted = deleter.join().unwrap();

    assert!(failures.is_empty(), "appends failed under contention: {failures:?}");
    let db = store.connect();
    let remaining = StageEngine::new(&db).list_stages(&tenant, app).unwrap();
    assert_eq!(remaining.len() + deleted, APPENDS);
    assert_pointer_invariants(&db, &tenant, app);
    // a note whose stage was deleted first is dropped, never the append
    assert!(db.list_comments(&tenant, app).unwrap().len() <= APPENDS);
}

#[test]
fn deleting_an_application_removes_its_history() {
    let store = Store::new();
    let db = store.connect();
    let tenant = Tenant::new("alice");
    let app = application(&db, &tenant, "Acme");
    let template = db.create_template(&tenant, "Applied", 1).unwrap().id;
    let engine = StageEngine::new(&db);
    engine
        .append_stage(&tenant, app, template, Some("first contact"))
        .unwrap();

    db.delete_application(&tenant, app).unwrap();
    assert!(engine.list_stages(&tenant, app).unwrap_err().is_not_found());

    let archived = db
        .list_applications(&tenant, Some(ApplicationStatus::Archived))
        .unwrap();
    assert!(archived.is_empty());
}
