//! Administrator containers and extension resolution.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use bureau_core::ObjectScope;

use crate::contract::{Administrator, ObjectHandle};
use crate::meta::{AdminMeta, ObjectMeta, OfficeMeta};

/// Lazily instantiates one administrator per scope and reuses it across
/// every duty invocation in that scope.
pub(crate) struct AdministratorContainer {
    instance: Mutex<Option<Arc<dyn Administrator>>>,
}

impl AdministratorContainer {
    pub fn new() -> Self {
        Self {
            instance: Mutex::new(None),
        }
    }

    pub fn instance(&self, meta: &AdminMeta) -> Arc<dyn Administrator> {
        let mut slot = self.instance.lock();
        if let Some(administrator) = slot.as_ref() {
            return Arc::clone(administrator);
        }
        debug!(administrator = %meta.name, "instantiating administrator");
        let administrator = meta.factory.create_administrator();
        *slot = Some(Arc::clone(&administrator));
        administrator
    }
}

fn office_object(meta: &OfficeMeta, r: bureau_core::ObjectRef) -> &Arc<ObjectMeta> {
    match r.scope {
        ObjectScope::Process => &meta.process_objects[r.index],
        ObjectScope::Thread => &meta.thread_objects[r.index],
        ObjectScope::Function => unreachable!("function-scoped objects are not administered"),
    }
}

/// Extract the extension views a duty operates on.
///
/// `objects` are the administered objects' handles, aligned with
/// `admin.administers`.
pub(crate) fn extract_extensions(
    admin: &AdminMeta,
    objects: &[ObjectHandle],
    office: &OfficeMeta,
) -> Result<Vec<ObjectHandle>, anyhow::Error> {
    admin
        .administers
        .iter()
        .zip(objects)
        .map(|((r, extension), handle)| {
            let object = office_object(office, *r);
            let (name, extractor) = &object.extensions[*extension];
            extractor(handle).ok_or_else(|| {
                anyhow::anyhow!("extension '{}' unavailable on '{}'", name, object.name)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::{json, Value};

    use bureau_core::{DutyKey, FlowKey, ObjectScope, TaskTarget};

    use crate::config::{
        AdministratorConfig, ObjectConfig, OfficeConfig, TaskConfig, TeamConfig, WorkConfig,
    };
    use crate::contract::{Administrator, DutyContext, SourcingContext, TaskContext};
    use crate::office::Office;
    use crate::testing::{
        admin_factory, identity_extension, immediate, init_logs, task_fn, unit_work, InlineTeam,
        Recorder,
    };

    /// Pushes a label through its first extension, then redirects to flow 0.
    struct Redirecting {
        label: &'static str,
        parameter: Value,
    }

    impl Administrator for Redirecting {
        fn do_duty(&self, _duty: DutyKey, ctx: &mut DutyContext<'_>) -> Result<(), anyhow::Error> {
            let log = ctx.extension_as::<Recorder>(0)?;
            log.push(self.label);
            ctx.do_flow(FlowKey::new(0), self.parameter.clone())?;
            Ok(())
        }
    }

    fn push_task(rec: &Arc<Recorder>, label: &'static str) -> Arc<dyn crate::contract::Task> {
        let rec = Arc::clone(rec);
        task_fn(move |_ctx: &mut TaskContext<'_>| {
            rec.push(label);
            Ok(None)
        })
    }

    fn audit_object(rec: &Arc<Recorder>) -> ObjectConfig {
        let rec = Arc::clone(rec);
        ObjectConfig::new(
            "audit",
            ObjectScope::Thread,
            immediate(move |_ctx: &SourcingContext<'_>| Ok(Arc::clone(&rec) as crate::contract::ObjectHandle)),
        )
        .with_extension("log", identity_extension())
    }

    #[test]
    fn pre_duty_redirect_prevents_administered_task_from_running() {
        init_logs();
        let rec = Recorder::new();
        let reject = {
            let rec = Arc::clone(&rec);
            task_fn(move |ctx: &mut TaskContext<'_>| {
                rec.push(format!(
                    "reject:{}",
                    ctx.parameter().as_str().unwrap_or_default()
                ));
                Ok(None)
            })
        };
        let config = OfficeConfig::new("test")
            .with_team(TeamConfig::new("inline", InlineTeam::new()))
            .with_object(audit_object(&rec))
            .with_administrator(
                AdministratorConfig::new(
                    "validate-input",
                    admin_factory(|| {
                        Arc::new(Redirecting {
                            label: "validate",
                            parameter: json!("invalid"),
                        }) as Arc<dyn Administrator>
                    }),
                )
                .administering("audit", "log")
                .with_flow(TaskTarget::in_work("orders", "reject-order")),
            )
            .with_work(
                WorkConfig::new("orders", "process-order", unit_work())
                    .with_task(
                        TaskConfig::new("process-order", "inline", push_task(&rec, "process"))
                            .with_pre_duty("validate-input", DutyKey::new(0))
                            .with_next(TaskTarget::task("ship")),
                    )
                    .with_task(TaskConfig::new("ship", "inline", push_task(&rec, "ship")))
                    .with_task(TaskConfig::new("reject-order", "inline", reject)),
            );
        let office = Office::build(config).expect("build office");
        let report = office.invoke("orders", json!({"order": 17})).expect("invoke").wait();
        assert!(report.outcome.is_complete());
        assert_eq!(rec.entries().join(","), "validate,reject:invalid");
    }

    #[test]
    fn post_duty_redirect_bypasses_task_continuation() {
        init_logs();
        let rec = Recorder::new();
        let config = OfficeConfig::new("test")
            .with_team(TeamConfig::new("inline", InlineTeam::new()))
            .with_object(audit_object(&rec))
            .with_administrator(
                AdministratorConfig::new(
                    "auditor",
                    admin_factory(|| {
                        Arc::new(Redirecting {
                            label: "audit",
                            parameter: Value::Null,
                        }) as Arc<dyn Administrator>
                    }),
                )
                .administering("audit", "log")
                .with_flow(TaskTarget::in_work("orders", "notify")),
            )
            .with_work(
                WorkConfig::new("orders", "process", unit_work())
                    .with_task(
                        TaskConfig::new("process", "inline", push_task(&rec, "process"))
                            .with_post_duty("auditor", DutyKey::new(0))
                            .with_next(TaskTarget::task("ship")),
                    )
                    .with_task(TaskConfig::new("ship", "inline", push_task(&rec, "ship")))
                    .with_task(TaskConfig::new("notify", "inline", push_task(&rec, "notify"))),
            );
        let office = Office::build(config).expect("build office");
        let report = office.invoke("orders", Value::Null).expect("invoke").wait();
        assert!(report.outcome.is_complete());
        assert_eq!(rec.entries().join(","), "process,audit,notify");
    }

    #[test]
    fn administrator_instantiated_once_per_scope() {
        init_logs();
        let rec = Recorder::new();
        let created = Arc::new(AtomicUsize::new(0));

        struct Logging {
            rec: Arc<Recorder>,
        }

        impl Administrator for Logging {
            fn do_duty(&self, duty: DutyKey, _ctx: &mut DutyContext<'_>) -> Result<(), anyhow::Error> {
                self.rec.push(format!("duty:{}", duty.index()));
                Ok(())
            }
        }

        let factory = {
            let rec = Arc::clone(&rec);
            let created = Arc::clone(&created);
            admin_factory(move || {
                created.fetch_add(1, Ordering::SeqCst);
                Arc::new(Logging {
                    rec: Arc::clone(&rec),
                }) as Arc<dyn Administrator>
            })
        };
        let config = OfficeConfig::new("test")
            .with_team(TeamConfig::new("inline", InlineTeam::new()))
            .with_administrator(AdministratorConfig::new("checker", factory))
            .with_work(
                WorkConfig::new("w", "a", unit_work())
                    .with_task(
                        TaskConfig::new("a", "inline", push_task(&rec, "a"))
                            .with_pre_duty("checker", DutyKey::new(0))
                            .with_next(TaskTarget::task("b")),
                    )
                    .with_task(
                        TaskConfig::new("b", "inline", push_task(&rec, "b"))
                            .with_pre_duty("checker", DutyKey::new(1)),
                    ),
            );
        let office = Office::build(config).expect("build office");
        let report = office.invoke("w", Value::Null).expect("invoke").wait();
        assert!(report.outcome.is_complete());
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(rec.entries().join(","), "duty:0,a,duty:1,b");
    }
}
