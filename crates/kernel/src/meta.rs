//! Bound office metadata.
//!
//! [`bind`] turns an [`OfficeConfig`] into fully index-resolved metadata.
//! Every name lookup, scope check, and cycle check happens here, once; the
//! running kernel only ever follows indices.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bureau_core::{
    ArgBinding, CleanupEscalation, DutyBinding, DutyKey, FlowKey, ObjectRef, ObjectScope,
    TaskTarget, TeamIndex,
};
use tracing::error;

use crate::config::{
    BuildError, EscalationConfig, ObjectConfig, OfficeConfig, RecycleHandler, TaskConfig,
    WorkConfig,
};
use crate::contract::{
    AdministratorFactory, ExtensionExtractor, ManagedObjectSource, RecycleUnit, Task, Team,
    WorkFactory,
};
use crate::escalation::{EscalationEntry, EscalationProcedure};

/// Bound reference to a task: work slot, task slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TaskRef {
    pub work: usize,
    pub task: usize,
}

/// Argument binding with every name resolved.
#[derive(Debug, Clone, Copy)]
pub(crate) enum BoundBinding {
    Dependency(ObjectRef),
    Parameter,
    Flow(FlowKey),
}

pub(crate) struct ObjectMeta {
    pub name: String,
    pub scope: ObjectScope,
    pub source: Arc<dyn ManagedObjectSource>,
    pub timeout: Option<Duration>,
    pub dependencies: Vec<ObjectRef>,
    pub extensions: Vec<(String, ExtensionExtractor)>,
    pub recycle: Option<Arc<dyn RecycleUnit>>,
}

pub(crate) struct DutyMeta {
    pub admin: usize,
    pub key: DutyKey,
}

pub(crate) struct TaskMeta {
    pub name: String,
    pub work: usize,
    pub team: TeamIndex,
    pub logic: Arc<dyn Task>,
    pub bindings: Vec<BoundBinding>,
    /// Dependency refs in binding order; resolved before the node runs.
    pub required: Vec<ObjectRef>,
    pub next: Option<TaskRef>,
    pub flows: Vec<TaskRef>,
    pub pre_duties: Vec<DutyMeta>,
    pub post_duties: Vec<DutyMeta>,
    pub escalations: EscalationProcedure,
}

pub(crate) struct WorkMeta {
    pub name: String,
    pub factory: Arc<dyn WorkFactory>,
    pub objects: Vec<Arc<ObjectMeta>>,
    pub initial: usize,
    pub tasks: Vec<Arc<TaskMeta>>,
}

pub(crate) struct AdminMeta {
    pub name: String,
    pub factory: Arc<dyn AdministratorFactory>,
    /// Administered objects with the extension slot to extract.
    pub administers: Vec<(ObjectRef, usize)>,
    pub flows: Vec<TaskRef>,
}

pub(crate) struct BoundTeam {
    pub name: String,
    pub team: Arc<dyn Team>,
    pub continuation: Option<TeamIndex>,
}

pub(crate) struct OfficeMeta {
    pub name: String,
    pub monitor_interval: Duration,
    pub teams: Vec<BoundTeam>,
    pub process_objects: Vec<Arc<ObjectMeta>>,
    pub thread_objects: Vec<Arc<ObjectMeta>>,
    pub administrators: Vec<Arc<AdminMeta>>,
    pub works: Vec<Arc<WorkMeta>>,
    pub escalations: EscalationProcedure,
    pub recycle_handler: RecycleHandler,
}

impl OfficeMeta {
    pub fn task(&self, r: TaskRef) -> &Arc<TaskMeta> {
        &self.works[r.work].tasks[r.task]
    }

    pub fn work_index(&self, name: &str) -> Option<usize> {
        self.works.iter().position(|w| w.name == name)
    }
}

/// Key for the object dependency graph during cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ObjKey {
    Office(ObjectScope, usize),
    Work(usize, usize),
}

fn obj_key(work: Option<usize>, r: ObjectRef) -> ObjKey {
    match r.scope {
        ObjectScope::Function => match work {
            Some(work) => ObjKey::Work(work, r.index),
            None => unreachable!("function refs only resolve inside a work"),
        },
        scope => ObjKey::Office(scope, r.index),
    }
}

fn lookup_object(
    work_slots: Option<&HashMap<String, usize>>,
    office_slots: &HashMap<String, ObjectRef>,
    name: &str,
) -> Option<ObjectRef> {
    if let Some(slots) = work_slots {
        if let Some(index) = slots.get(name) {
            return Some(ObjectRef::new(ObjectScope::Function, *index));
        }
    }
    office_slots.get(name).copied()
}

fn bind_object(
    o: &ObjectConfig,
    work_slots: Option<&HashMap<String, usize>>,
    office_slots: &HashMap<String, ObjectRef>,
) -> Result<Arc<ObjectMeta>, BuildError> {
    let mut dependencies = Vec::with_capacity(o.descriptor.dependencies.len());
    for dep in &o.descriptor.dependencies {
        let r = lookup_object(work_slots, office_slots, dep).ok_or_else(|| {
            BuildError::UnknownObject {
                referrer: o.descriptor.name.clone(),
                object: dep.clone(),
            }
        })?;
        if !r.scope.reachable_from(o.descriptor.scope) {
            return Err(BuildError::ScopeViolation {
                object: o.descriptor.name.clone(),
                scope: o.descriptor.scope,
                dependency: dep.clone(),
                dependency_scope: r.scope,
            });
        }
        dependencies.push(r);
    }
    Ok(Arc::new(ObjectMeta {
        name: o.descriptor.name.clone(),
        scope: o.descriptor.scope,
        source: Arc::clone(&o.source),
        timeout: o.descriptor.timeout_ms.map(Duration::from_millis),
        dependencies,
        extensions: o
            .extensions
            .iter()
            .map(|(n, e)| (n.clone(), Arc::clone(e)))
            .collect(),
        recycle: o.recycle.clone(),
    }))
}

struct TargetResolver<'a> {
    work_slots: &'a HashMap<String, usize>,
    task_slots: &'a [HashMap<String, usize>],
    works: &'a [WorkConfig],
}

impl TargetResolver<'_> {
    fn resolve(&self, current: Option<usize>, target: &TaskTarget) -> Result<TaskRef, BuildError> {
        let work = match (&target.work, current) {
            (Some(name), _) => *self
                .work_slots
                .get(name)
                .ok_or_else(|| BuildError::UnknownWork(name.clone()))?,
            (None, Some(current)) => current,
            (None, None) => return Err(BuildError::UnqualifiedTarget(target.task.clone())),
        };
        let task = *self.task_slots[work].get(&target.task).ok_or_else(|| {
            BuildError::UnknownTask {
                work: self.works[work].descriptor.name.clone(),
                task: target.task.clone(),
            }
        })?;
        Ok(TaskRef { work, task })
    }

    fn escalations(
        &self,
        current: Option<usize>,
        entries: &[EscalationConfig],
    ) -> Result<EscalationProcedure, BuildError> {
        let mut bound = Vec::with_capacity(entries.len());
        for e in entries {
            bound.push(EscalationEntry {
                rule: e.rule.clone(),
                handler: self.resolve(current, &e.handler)?,
            });
        }
        Ok(EscalationProcedure::new(bound))
    }
}

fn bind_duties(
    task: &TaskConfig,
    admin_slots: &HashMap<String, usize>,
    duties: &[DutyBinding],
) -> Result<Vec<DutyMeta>, BuildError> {
    duties
        .iter()
        .map(|d| {
            Ok(DutyMeta {
                admin: *admin_slots.get(&d.administrator).ok_or_else(|| {
                    BuildError::UnknownAdministrator {
                        task: task.descriptor.name.clone(),
                        administrator: d.administrator.clone(),
                    }
                })?,
                key: d.duty,
            })
        })
        .collect()
}

/// Validate a configuration and bind it into office metadata.
pub(crate) fn bind(config: OfficeConfig) -> Result<OfficeMeta, BuildError> {
    let OfficeConfig {
        name,
        monitor_interval,
        teams: team_configs,
        objects: object_configs,
        administrators: admin_configs,
        works: work_configs,
        escalations: office_escalations,
        recycle_handler,
    } = config;

    // Teams.
    let mut team_slots: HashMap<String, TeamIndex> = HashMap::new();
    for (i, t) in team_configs.iter().enumerate() {
        if team_slots.insert(t.name.clone(), TeamIndex::new(i)).is_some() {
            return Err(BuildError::DuplicateTeam(t.name.clone()));
        }
    }
    let mut teams = Vec::with_capacity(team_configs.len());
    for t in &team_configs {
        let continuation = match &t.continuation {
            Some(c) => Some(*team_slots.get(c).ok_or_else(|| {
                BuildError::UnknownContinuationTeam {
                    team: t.name.clone(),
                    continuation: c.clone(),
                }
            })?),
            None => None,
        };
        teams.push(BoundTeam {
            name: t.name.clone(),
            team: Arc::clone(&t.team),
            continuation,
        });
    }

    // Office-level object slots (one namespace across process and thread).
    let mut office_slots: HashMap<String, ObjectRef> = HashMap::new();
    let mut process_configs: Vec<&ObjectConfig> = Vec::new();
    let mut thread_configs: Vec<&ObjectConfig> = Vec::new();
    for o in &object_configs {
        let slot = match o.descriptor.scope {
            ObjectScope::Process => {
                process_configs.push(o);
                ObjectRef::new(ObjectScope::Process, process_configs.len() - 1)
            }
            ObjectScope::Thread => {
                thread_configs.push(o);
                ObjectRef::new(ObjectScope::Thread, thread_configs.len() - 1)
            }
            ObjectScope::Function => {
                return Err(BuildError::FunctionScopeAtOffice(o.descriptor.name.clone()))
            }
        };
        if office_slots.insert(o.descriptor.name.clone(), slot).is_some() {
            return Err(BuildError::DuplicateObject(o.descriptor.name.clone()));
        }
    }
    let process_objects = process_configs
        .iter()
        .map(|o| bind_object(o, None, &office_slots))
        .collect::<Result<Vec<_>, _>>()?;
    let thread_objects = thread_configs
        .iter()
        .map(|o| bind_object(o, None, &office_slots))
        .collect::<Result<Vec<_>, _>>()?;

    // Work and task name tables first, so targets may point forward and
    // across works.
    let mut work_slots: HashMap<String, usize> = HashMap::new();
    for (i, w) in work_configs.iter().enumerate() {
        if work_slots.insert(w.descriptor.name.clone(), i).is_some() {
            return Err(BuildError::DuplicateWork(w.descriptor.name.clone()));
        }
    }
    let mut task_slots: Vec<HashMap<String, usize>> = Vec::with_capacity(work_configs.len());
    for w in &work_configs {
        if w.tasks.is_empty() {
            return Err(BuildError::NoTasks(w.descriptor.name.clone()));
        }
        let mut slots = HashMap::new();
        for (i, t) in w.tasks.iter().enumerate() {
            if slots.insert(t.descriptor.name.clone(), i).is_some() {
                return Err(BuildError::DuplicateTask {
                    work: w.descriptor.name.clone(),
                    task: t.descriptor.name.clone(),
                });
            }
        }
        task_slots.push(slots);
    }
    let resolver = TargetResolver {
        work_slots: &work_slots,
        task_slots: &task_slots,
        works: &work_configs,
    };

    // Administrators operate on office-level (thread or process) objects.
    let mut admin_slots: HashMap<String, usize> = HashMap::new();
    for (i, a) in admin_configs.iter().enumerate() {
        if admin_slots.insert(a.descriptor.name.clone(), i).is_some() {
            return Err(BuildError::DuplicateAdministrator(a.descriptor.name.clone()));
        }
    }
    let mut administrators = Vec::with_capacity(admin_configs.len());
    for a in &admin_configs {
        let mut administers = Vec::with_capacity(a.descriptor.administers.len());
        for binding in &a.descriptor.administers {
            let r = lookup_object(None, &office_slots, &binding.object).ok_or_else(|| {
                BuildError::UnknownObject {
                    referrer: a.descriptor.name.clone(),
                    object: binding.object.clone(),
                }
            })?;
            let meta = match r.scope {
                ObjectScope::Process => &process_objects[r.index],
                ObjectScope::Thread => &thread_objects[r.index],
                ObjectScope::Function => {
                    unreachable!("office-level lookup never yields function scope")
                }
            };
            let extension = meta
                .extensions
                .iter()
                .position(|(n, _)| n == &binding.extension)
                .ok_or_else(|| BuildError::UnknownExtension {
                    administrator: a.descriptor.name.clone(),
                    object: binding.object.clone(),
                    extension: binding.extension.clone(),
                })?;
            administers.push((r, extension));
        }
        let flows = a
            .descriptor
            .flows
            .iter()
            .map(|t| resolver.resolve(None, t))
            .collect::<Result<Vec<_>, _>>()?;
        administrators.push(Arc::new(AdminMeta {
            name: a.descriptor.name.clone(),
            factory: Arc::clone(&a.factory),
            administers,
            flows,
        }));
    }

    // Works and tasks.
    let mut works = Vec::with_capacity(work_configs.len());
    let mut dependency_edges: Vec<(ObjKey, ObjKey, String)> = Vec::new();
    for (i, meta) in process_objects.iter().enumerate() {
        for dep in &meta.dependencies {
            dependency_edges.push((
                ObjKey::Office(ObjectScope::Process, i),
                obj_key(None, *dep),
                meta.name.clone(),
            ));
        }
    }
    for (i, meta) in thread_objects.iter().enumerate() {
        for dep in &meta.dependencies {
            dependency_edges.push((
                ObjKey::Office(ObjectScope::Thread, i),
                obj_key(None, *dep),
                meta.name.clone(),
            ));
        }
    }

    for (wi, w) in work_configs.iter().enumerate() {
        let mut function_slots: HashMap<String, usize> = HashMap::new();
        for (i, o) in w.objects.iter().enumerate() {
            if o.descriptor.scope != ObjectScope::Function {
                return Err(BuildError::NonFunctionScopeInWork {
                    work: w.descriptor.name.clone(),
                    object: o.descriptor.name.clone(),
                });
            }
            if function_slots.insert(o.descriptor.name.clone(), i).is_some() {
                return Err(BuildError::DuplicateObject(o.descriptor.name.clone()));
            }
        }
        let objects = w
            .objects
            .iter()
            .map(|o| bind_object(o, Some(&function_slots), &office_slots))
            .collect::<Result<Vec<_>, _>>()?;
        for (i, meta) in objects.iter().enumerate() {
            for dep in &meta.dependencies {
                dependency_edges.push((
                    ObjKey::Work(wi, i),
                    obj_key(Some(wi), *dep),
                    meta.name.clone(),
                ));
            }
        }

        let mut tasks = Vec::with_capacity(w.tasks.len());
        for t in &w.tasks {
            let team = *team_slots.get(&t.descriptor.team).ok_or_else(|| {
                BuildError::UnknownTeam {
                    task: t.descriptor.name.clone(),
                    team: t.descriptor.team.clone(),
                }
            })?;
            let mut bindings = Vec::with_capacity(t.descriptor.bindings.len());
            let mut required = Vec::new();
            for binding in &t.descriptor.bindings {
                bindings.push(match binding {
                    ArgBinding::Dependency { object } => {
                        let r = lookup_object(Some(&function_slots), &office_slots, object)
                            .ok_or_else(|| BuildError::UnknownObject {
                                referrer: t.descriptor.name.clone(),
                                object: object.clone(),
                            })?;
                        required.push(r);
                        BoundBinding::Dependency(r)
                    }
                    ArgBinding::Parameter => BoundBinding::Parameter,
                    ArgBinding::Flow { key } => BoundBinding::Flow(*key),
                });
            }
            let next = t
                .descriptor
                .next
                .as_ref()
                .map(|n| resolver.resolve(Some(wi), n))
                .transpose()?;
            let flows = t
                .descriptor
                .flows
                .iter()
                .map(|f| resolver.resolve(Some(wi), f))
                .collect::<Result<Vec<_>, _>>()?;
            tasks.push(Arc::new(TaskMeta {
                name: t.descriptor.name.clone(),
                work: wi,
                team,
                logic: Arc::clone(&t.logic),
                bindings,
                required,
                next,
                flows,
                pre_duties: bind_duties(t, &admin_slots, &t.descriptor.pre_duties)?,
                post_duties: bind_duties(t, &admin_slots, &t.descriptor.post_duties)?,
                escalations: resolver.escalations(Some(wi), &t.escalations)?,
            }));
        }

        let initial = *task_slots[wi]
            .get(&w.descriptor.initial_task)
            .ok_or_else(|| BuildError::UnknownInitialTask {
                work: w.descriptor.name.clone(),
                task: w.descriptor.initial_task.clone(),
            })?;
        works.push(Arc::new(WorkMeta {
            name: w.descriptor.name.clone(),
            factory: Arc::clone(&w.factory),
            objects,
            initial,
            tasks,
        }));
    }

    detect_cycles(&dependency_edges)?;

    let escalations = resolver.escalations(None, &office_escalations)?;

    let recycle_handler = recycle_handler.unwrap_or_else(|| {
        Arc::new(|ce: &CleanupEscalation| {
            error!(object = %ce.object, "cleanup escalation: {}", ce.cause);
        })
    });

    Ok(OfficeMeta {
        name,
        monitor_interval,
        teams,
        process_objects,
        thread_objects,
        administrators,
        works,
        escalations,
        recycle_handler,
    })
}

fn detect_cycles(edges: &[(ObjKey, ObjKey, String)]) -> Result<(), BuildError> {
    let mut adjacency: HashMap<ObjKey, Vec<ObjKey>> = HashMap::new();
    let mut names: HashMap<ObjKey, String> = HashMap::new();
    for (from, to, name) in edges {
        adjacency.entry(*from).or_default().push(*to);
        names.insert(*from, name.clone());
    }
    let mut done: HashSet<ObjKey> = HashSet::new();
    for start in adjacency.keys() {
        if done.contains(start) {
            continue;
        }
        let mut path: Vec<ObjKey> = Vec::new();
        let mut stack: Vec<(ObjKey, usize)> = vec![(*start, 0)];
        while let Some((key, child)) = stack.pop() {
            if child == 0 {
                if path.contains(&key) {
                    let name = names.get(&key).cloned().unwrap_or_default();
                    return Err(BuildError::DependencyCycle(name));
                }
                if done.contains(&key) {
                    continue;
                }
                path.push(key);
            }
            let children = adjacency.get(&key).map(|v| v.as_slice()).unwrap_or(&[]);
            if child < children.len() {
                stack.push((key, child + 1));
                stack.push((children[child], 0));
            } else {
                path.pop();
                done.insert(key);
            }
        }
    }
    Ok(())
}
