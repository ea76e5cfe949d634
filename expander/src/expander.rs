//! The expansion engine.
//!
//! Drives the translation from syntax to a fully known partial core
//! graph for one expansion unit. The engine owns all expander state:
//! counters for scopes, bindings, variables, nodes and tasks, the
//! binding table, the phase-indexed environment, the received-signal
//! set, and the FIFO task queue. Special forms run directly; user macros
//! go through the evaluator interface and may suspend on signals, in
//! which case their continuation is parked until `send_signal` delivers
//! the rendezvous token.

use crate::binding::{Binding, BindingTable};
use crate::env::{EValue, ExpansionEnv, Phase, SyntacticCategory};
use crate::errors::ExpansionErr;
use crate::evaluator::{CoreEvaluator, MacroEvaluator};
use kernel::ast::{CoreShape, Literal, NodeId, PartialTree, PrimOp, Var};
use kernel::eval::{self, Continuation, Effects, MacroOutcome, Signal, Value};
use kernel::graph::{NodeIdGen, PartialCoreGraph};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use syntax::{Ident, Scope, ScopeSet, SrcLoc, Syntax, SyntaxKind};

/// Opaque identity of an expansion task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// A partial core fragment produced by a special form: known
/// constructors wrapping either further known fragments or syntax still
/// to be expanded. Every `Sub` becomes a child task targeting a fresh
/// node identity.
#[derive(Debug)]
pub enum Frag {
    Core(CoreShape<Box<Frag>>),
    Sub(Syntax),
}

pub type PrimFn =
    fn(&mut Expander, &Syntax, Phase, SyntacticCategory) -> Result<Frag, ExpansionErr>;

/// A built-in special form.
#[derive(Debug, Clone, Copy)]
pub struct Prim {
    pub name: &'static str,
    pub category: SyntacticCategory,
    pub run: PrimFn,
}

enum Work {
    Expand(Syntax),
    Resume { k: Continuation, signal: Signal },
}

struct Task {
    id: TaskId,
    target: NodeId,
    phase: Phase,
    category: SyntacticCategory,
    /// Hygiene scope still to flip onto a suspended macro's eventual
    /// output.
    pending_flip: Option<Scope>,
    loc: SrcLoc,
    /// The drive root this task works towards; `drive` is done with a
    /// root once no live task carries it.
    root: NodeId,
    work: Work,
}

struct BlockedTask {
    id: TaskId,
    target: NodeId,
    phase: Phase,
    category: SyntacticCategory,
    pending_flip: Option<Scope>,
    loc: SrcLoc,
    root: NodeId,
    signal: Signal,
    k: Continuation,
}

/// Outcome of driving the scheduler towards a root node.
#[derive(Debug)]
pub enum Expansion {
    Complete(PartialCoreGraph),
    /// No ready task remains; a host may `send_signal` and drive again.
    Blocked { task: TaskId, signal: Signal },
}

/// One expanded module-level form.
#[derive(Debug)]
pub enum ExpandedDecl {
    Define {
        name: String,
        var: Var,
        binding: Binding,
        graph: PartialCoreGraph,
    },
    DefineSyntax {
        name: String,
        binding: Binding,
    },
    Expr {
        graph: PartialCoreGraph,
    },
}

enum DeclInfo {
    Define {
        name: String,
        var: Var,
        binding: Binding,
    },
    DefineSyntax {
        name: String,
        binding: Binding,
    },
}

pub struct Expander {
    evaluator: Box<dyn MacroEvaluator>,
    signals: HashSet<Signal>,
    env: ExpansionEnv,
    bindings: BindingTable,
    builtins: HashMap<Binding, EValue>,
    module_binding: Option<Binding>,
    nodes: BTreeMap<NodeId, CoreShape<NodeId>>,
    node_ids: NodeIdGen,
    scope_gen: u64,
    binding_gen: u64,
    var_gen: u64,
    task_gen: u64,
    ready: VecDeque<Task>,
    blocked: Vec<BlockedTask>,
    /// Live tasks per drive root, kept current so completion is an O(1)
    /// lookup instead of a walk over the arena.
    open: HashMap<NodeId, u64>,
    trace: Vec<(String, SrcLoc)>,
    current_decl: Option<DeclInfo>,
}

impl Default for Expander {
    fn default() -> Self {
        Expander::new()
    }
}

impl Expander {
    pub fn new() -> Self {
        Expander::with_evaluator(Box::new(CoreEvaluator))
    }

    pub fn with_evaluator(evaluator: Box<dyn MacroEvaluator>) -> Self {
        let mut expander = Expander {
            evaluator,
            signals: HashSet::new(),
            env: ExpansionEnv::new(),
            bindings: BindingTable::new(),
            builtins: HashMap::new(),
            module_binding: None,
            nodes: BTreeMap::new(),
            node_ids: NodeIdGen::new(),
            scope_gen: 0,
            binding_gen: 0,
            var_gen: 0,
            task_gen: 0,
            ready: VecDeque::new(),
            blocked: Vec::new(),
            open: HashMap::new(),
            trace: Vec::new(),
            current_decl: None,
        };
        expander.bootstrap();
        expander
    }

    fn bootstrap(&mut self) {
        const PRIMS: &[Prim] = &[
            Prim {
                name: "lambda",
                category: SyntacticCategory::Expression,
                run: expand_lambda,
            },
            Prim {
                name: "quote",
                category: SyntacticCategory::Expression,
                run: expand_quote,
            },
            Prim {
                name: "let-syntax",
                category: SyntacticCategory::Expression,
                run: expand_let_syntax,
            },
            Prim {
                name: "#%app",
                category: SyntacticCategory::Expression,
                run: expand_app,
            },
            Prim {
                name: "define",
                category: SyntacticCategory::Declaration,
                run: expand_define,
            },
            Prim {
                name: "define-syntax",
                category: SyntacticCategory::Declaration,
                run: expand_define_syntax,
            },
            Prim {
                name: "#%module",
                category: SyntacticCategory::Module,
                run: expand_module_form,
            },
        ];
        for prim in PRIMS {
            let binding = self.fresh_binding();
            self.bindings.add(prim.name, ScopeSet::empty(), binding);
            self.builtins.insert(binding, EValue::PrimMacro(*prim));
            if prim.name == "#%module" {
                self.module_binding = Some(binding);
            }
        }
        for op in [
            PrimOp::Cons,
            PrimOp::Car,
            PrimOp::Cdr,
            PrimOp::WaitSignal,
            PrimOp::SendSignal,
        ] {
            let binding = self.fresh_binding();
            self.bindings.add(op.name(), ScopeSet::empty(), binding);
            self.builtins.insert(
                binding,
                EValue::VarMacro(PartialTree::Node(CoreShape::Prim(op))),
            );
        }
    }

    // -------------------------------------------------------------------------
    // Fresh tokens and binding-table operations
    // -------------------------------------------------------------------------

    pub fn fresh_scope(&mut self) -> Scope {
        let scope = Scope(self.scope_gen);
        self.scope_gen += 1;
        scope
    }

    pub fn fresh_binding(&mut self) -> Binding {
        let binding = Binding(self.binding_gen);
        self.binding_gen += 1;
        binding
    }

    pub fn fresh_var(&mut self) -> Var {
        let var = Var(self.var_gen);
        self.var_gen += 1;
        var
    }

    fn fresh_task_id(&mut self) -> TaskId {
        let id = TaskId(self.task_gen);
        self.task_gen += 1;
        id
    }

    pub fn add_binding(&mut self, name: &str, scopes: ScopeSet, binding: Binding) {
        self.bindings.add(name, scopes, binding);
    }

    pub fn all_matching_bindings(
        &self,
        name: &str,
        scopes: &ScopeSet,
    ) -> Vec<(&ScopeSet, Binding)> {
        self.bindings.matching(name, scopes)
    }

    pub fn resolve(&self, stx: &Syntax) -> Result<Binding, ExpansionErr> {
        self.bindings.resolve(stx)
    }

    /// Bind `name` as a variable reading from a fresh core variable.
    pub fn bind_variable(
        &mut self,
        name: &str,
        scopes: ScopeSet,
        phase: Phase,
    ) -> (Binding, Var) {
        let binding = self.fresh_binding();
        let var = self.fresh_var();
        self.add_binding(name, scopes, binding);
        self.env.extend(
            phase,
            binding,
            EValue::VarMacro(PartialTree::Node(CoreShape::Ref(var))),
        );
        (binding, var)
    }

    /// Bind `name` to a user macro transformer value.
    pub fn bind_user_macro(
        &mut self,
        name: &str,
        scopes: ScopeSet,
        category: SyntacticCategory,
        transformer: Value,
        phase: Phase,
    ) -> Binding {
        let binding = self.fresh_binding();
        self.add_binding(name, scopes, binding);
        self.env.extend(
            phase,
            binding,
            EValue::UserMacro {
                category,
                transformer,
            },
        );
        binding
    }

    fn lookup_evalue(&self, phase: Phase, binding: Binding) -> Option<&EValue> {
        // Builtins are phase-universal; the phased environment shadows
        // them only through the binding table, never here.
        self.env
            .lookup(phase, binding)
            .or_else(|| self.builtins.get(&binding))
    }

    // -------------------------------------------------------------------------
    // Signals
    // -------------------------------------------------------------------------

    /// Mark a signal as received and wake every task blocked on it. The
    /// woken tasks go to the back of the ready queue; delivery becomes
    /// observable at the next scheduler step.
    pub fn send_signal(&mut self, signal: Signal) {
        self.signals.insert(signal);
        let mut still_blocked = Vec::new();
        for task in self.blocked.drain(..) {
            if task.signal == signal {
                // Moving between the blocked list and the ready queue
                // leaves the open count untouched.
                self.ready.push_back(Task {
                    id: task.id,
                    target: task.target,
                    phase: task.phase,
                    category: task.category,
                    pending_flip: task.pending_flip,
                    loc: task.loc,
                    root: task.root,
                    work: Work::Resume { k: task.k, signal },
                });
            } else {
                still_blocked.push(task);
            }
        }
        self.blocked = still_blocked;
    }

    /// Macro-use steps recorded so far: (macro name, use site).
    pub fn trace(&self) -> &[(String, SrcLoc)] {
        &self.trace
    }

    pub fn take_trace(&mut self) -> Vec<(String, SrcLoc)> {
        std::mem::take(&mut self.trace)
    }

    // -------------------------------------------------------------------------
    // Entry points
    // -------------------------------------------------------------------------

    pub fn expand_expression(&mut self, stx: Syntax) -> Result<PartialCoreGraph, ExpansionErr> {
        let root = self.begin_expression(stx);
        match self.drive(root)? {
            Expansion::Complete(graph) => Ok(graph),
            Expansion::Blocked { task, signal } => {
                self.abort_unit();
                Err(ExpansionErr::StuckExpansion { task, signal })
            }
        }
    }

    pub fn expand_declaration(&mut self, stx: Syntax) -> Result<ExpandedDecl, ExpansionErr> {
        let root = self.begin_declaration(stx);
        match self.drive(root)? {
            Expansion::Complete(graph) => Ok(match self.current_decl.take() {
                Some(DeclInfo::Define { name, var, binding }) => ExpandedDecl::Define {
                    name,
                    var,
                    binding,
                    graph,
                },
                Some(DeclInfo::DefineSyntax { name, binding }) => {
                    ExpandedDecl::DefineSyntax { name, binding }
                }
                None => ExpandedDecl::Expr { graph },
            }),
            Expansion::Blocked { task, signal } => {
                self.abort_unit();
                Err(ExpansionErr::StuckExpansion { task, signal })
            }
        }
    }

    /// Expand a module body: an optional `#%module` wrapper or a
    /// module-category macro may rewrite the whole body, then each item
    /// expands as a declaration, in order.
    pub fn expand_module_body(
        &mut self,
        stxs: &[Syntax],
    ) -> Result<Vec<ExpandedDecl>, ExpansionErr> {
        let mut decls = Vec::new();
        for form in self.module_items(stxs)? {
            decls.push(self.expand_declaration(form)?);
        }
        Ok(decls)
    }

    /// Apply module-level rewrites only: unwrap a `#%module` form and
    /// run module-category macros until the item list is stable. Drivers
    /// that want to keep going past a failing declaration expand the
    /// returned items one at a time.
    pub fn module_items(&mut self, stxs: &[Syntax]) -> Result<Vec<Syntax>, ExpansionErr> {
        let mut forms: Vec<Syntax> = stxs.to_vec();
        loop {
            let rewrite = match forms.as_slice() {
                [only] => self.module_rewrite(only.clone())?,
                _ => None,
            };
            match rewrite {
                Some(new_forms) => forms = new_forms,
                None => return Ok(forms),
            }
        }
    }

    /// A single body form may be a `#%module` wrapper or a use of a
    /// module-category macro; both rewrite to a new body.
    fn module_rewrite(&mut self, form: Syntax) -> Result<Option<Vec<Syntax>>, ExpansionErr> {
        let items = match &form.kind {
            SyntaxKind::List(items) if !items.is_empty() => items.clone(),
            _ => return Ok(None),
        };
        let head = &items[0];
        if head.id_name().is_none() {
            return Ok(None);
        }
        let binding = match self.resolve(head) {
            Ok(binding) => binding,
            Err(_) => return Ok(None),
        };
        if Some(binding) == self.module_binding {
            return Ok(Some(items[1..].to_vec()));
        }
        let transformer = match self.lookup_evalue(Phase::RUNTIME, binding) {
            Some(EValue::UserMacro {
                category: SyntacticCategory::Module,
                transformer,
            }) => transformer.clone(),
            _ => return Ok(None),
        };
        let name = head.id_name().unwrap_or_default().to_string();
        let rewritten = self.invoke_module_macro(&name, &transformer, form)?;
        Ok(Some(vec![rewritten]))
    }

    /// Allocate the root node and the root task for an expression unit.
    pub fn begin_expression(&mut self, stx: Syntax) -> NodeId {
        self.begin_unit(stx, SyntacticCategory::Expression)
    }

    pub fn begin_declaration(&mut self, stx: Syntax) -> NodeId {
        self.begin_unit(stx, SyntacticCategory::Declaration)
    }

    fn begin_unit(&mut self, stx: Syntax, category: SyntacticCategory) -> NodeId {
        self.reset_unit();
        let root = self.node_ids.fresh();
        self.push_ready(stx, root, Phase::RUNTIME, category, root);
        root
    }

    fn reset_unit(&mut self) {
        self.ready.clear();
        self.blocked.clear();
        self.nodes.clear();
        self.open.clear();
        self.current_decl = None;
    }

    fn abort_unit(&mut self) {
        self.reset_unit();
    }

    /// Run the scheduler until `root` is fully wired, no ready task
    /// remains, or a fatal error occurs. On error the partially built
    /// graph is discarded.
    pub fn drive(&mut self, root: NodeId) -> Result<Expansion, ExpansionErr> {
        let result = self.drive_inner(root);
        if result.is_err() {
            self.abort_unit();
        }
        result
    }

    fn drive_inner(&mut self, root: NodeId) -> Result<Expansion, ExpansionErr> {
        loop {
            if self.open_tasks(root) == 0 {
                assert!(
                    self.complete_at(root),
                    "no live task for {} but its subtree has holes",
                    root
                );
                return Ok(Expansion::Complete(self.extract_graph(root)));
            }
            match self.ready.pop_front() {
                Some(task) => self.step(task)?,
                None => {
                    let representative = self
                        .blocked
                        .iter()
                        .find(|t| t.root == root)
                        .map(|t| (t.id, t.signal))
                        .expect("a root with live tasks has a ready or blocked one");
                    return Ok(Expansion::Blocked {
                        task: representative.0,
                        signal: representative.1,
                    });
                }
            }
        }
    }

    fn open_tasks(&self, root: NodeId) -> u64 {
        self.open.get(&root).copied().unwrap_or(0)
    }

    // Integrity check at completion; the scheduler itself relies on the
    // open-task count.
    fn complete_at(&self, id: NodeId) -> bool {
        match self.nodes.get(&id) {
            None => false,
            Some(shape) => shape.children().iter().all(|c| self.complete_at(**c)),
        }
    }

    /// Collect the finished subgraph. The working arena keeps its
    /// entries until the next unit begins, so driving a completed root
    /// again just returns the same graph.
    fn extract_graph(&self, root: NodeId) -> PartialCoreGraph {
        let mut nodes = BTreeMap::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if nodes.contains_key(&id) {
                continue;
            }
            if let Some(shape) = self.nodes.get(&id) {
                for child in shape.children() {
                    stack.push(*child);
                }
                nodes.insert(id, shape.clone());
            }
        }
        PartialCoreGraph { root, nodes }
    }

    // -------------------------------------------------------------------------
    // Scheduler
    // -------------------------------------------------------------------------

    fn push_ready(
        &mut self,
        stx: Syntax,
        target: NodeId,
        phase: Phase,
        category: SyntacticCategory,
        root: NodeId,
    ) {
        let id = self.fresh_task_id();
        let loc = stx.loc.clone();
        self.enqueue(Task {
            id,
            target,
            phase,
            category,
            pending_flip: None,
            loc,
            root,
            work: Work::Expand(stx),
        });
    }

    fn enqueue(&mut self, task: Task) {
        *self.open.entry(task.root).or_insert(0) += 1;
        self.ready.push_back(task);
    }

    fn park(&mut self, task: BlockedTask) {
        *self.open.entry(task.root).or_insert(0) += 1;
        self.blocked.push(task);
    }

    fn release(&mut self, root: NodeId) {
        if let Some(count) = self.open.get_mut(&root) {
            *count -= 1;
            if *count == 0 {
                self.open.remove(&root);
            }
        }
    }

    fn step(&mut self, task: Task) -> Result<(), ExpansionErr> {
        let Task {
            id,
            target,
            phase,
            category,
            pending_flip,
            loc,
            root,
            work,
        } = task;
        // The task is live again the moment it re-enqueues, parks, or
        // spawns children; otherwise its target was filled.
        self.release(root);
        match work {
            Work::Expand(stx) => self.dispatch(stx, id, target, phase, category, root),
            Work::Resume { k, signal } => {
                let mut fx = Effects::default();
                let outcome = k.resume(signal, &mut fx).map_err(|source| ExpansionErr::Eval {
                    source,
                    loc: loc.clone(),
                })?;
                self.route_effects(fx);
                self.finish_macro(outcome, id, target, phase, category, pending_flip, loc, root)
            }
        }
    }

    fn dispatch(
        &mut self,
        stx: Syntax,
        id: TaskId,
        target: NodeId,
        phase: Phase,
        category: SyntacticCategory,
        root: NodeId,
    ) -> Result<(), ExpansionErr> {
        match &stx.kind {
            SyntaxKind::Sig(n) => {
                self.install(
                    target,
                    Frag::Core(CoreShape::Lit(Literal::Sig(*n))),
                    phase,
                    root,
                );
                Ok(())
            }
            SyntaxKind::Bool(b) => {
                self.install(
                    target,
                    Frag::Core(CoreShape::Lit(Literal::Bool(*b))),
                    phase,
                    root,
                );
                Ok(())
            }
            SyntaxKind::Str(s) => {
                self.install(
                    target,
                    Frag::Core(CoreShape::Lit(Literal::Str(s.clone()))),
                    phase,
                    root,
                );
                Ok(())
            }
            SyntaxKind::Id(_) => {
                let evalue = self.resolve_evalue(&stx, phase)?;
                match evalue {
                    EValue::PrimMacro(prim) => {
                        self.check_prim_category(&prim, category, &stx.loc)?;
                        let frag = (prim.run)(self, &stx, phase, category)?;
                        self.install(target, frag, phase, root);
                        Ok(())
                    }
                    EValue::VarMacro(tree) => {
                        self.install_tree(target, &tree);
                        Ok(())
                    }
                    EValue::UserMacro {
                        category: macro_category,
                        transformer,
                    } => {
                        self.check_user_category(macro_category, category, &stx.loc)?;
                        let name = stx.id_name().unwrap_or_default().to_string();
                        self.invoke_user_macro(
                            &name,
                            transformer,
                            stx,
                            id,
                            target,
                            phase,
                            category,
                            root,
                        )
                    }
                }
            }
            SyntaxKind::List(items) | SyntaxKind::Vec(items) => {
                let is_vec = matches!(stx.kind, SyntaxKind::Vec(_));
                let items = items.clone();
                if items.is_empty() {
                    return Err(ExpansionErr::NotCons {
                        loc: stx.loc.clone(),
                    });
                }
                let head = items[0].clone();
                if head.id_name().is_some() {
                    let evalue = self.resolve_evalue(&head, phase)?;
                    match evalue {
                        EValue::PrimMacro(prim) => {
                            self.check_prim_category(&prim, category, &stx.loc)?;
                            let frag = (prim.run)(self, &stx, phase, category)?;
                            self.install(target, frag, phase, root);
                            Ok(())
                        }
                        EValue::UserMacro {
                            category: macro_category,
                            transformer,
                        } => {
                            self.check_user_category(macro_category, category, &stx.loc)?;
                            let name = head.id_name().unwrap_or_default().to_string();
                            self.invoke_user_macro(
                                &name,
                                transformer,
                                stx,
                                id,
                                target,
                                phase,
                                category,
                                root,
                            )
                        }
                        EValue::VarMacro(_) => {
                            if is_vec {
                                Err(ExpansionErr::NotCons {
                                    loc: stx.loc.clone(),
                                })
                            } else {
                                let frag = app_fold(&items);
                                self.install(target, frag, phase, root);
                                Ok(())
                            }
                        }
                    }
                } else if is_vec {
                    Err(ExpansionErr::NotCons {
                        loc: stx.loc.clone(),
                    })
                } else {
                    let frag = app_fold(&items);
                    self.install(target, frag, phase, root);
                    Ok(())
                }
            }
        }
    }

    fn resolve_evalue(&self, stx: &Syntax, phase: Phase) -> Result<EValue, ExpansionErr> {
        let binding = self.resolve(stx)?;
        match self.lookup_evalue(phase, binding) {
            Some(evalue) => Ok(evalue.clone()),
            // Bound, but not at this phase: out-of-phase references look
            // unknown to the user.
            None => Err(ExpansionErr::Unknown {
                name: stx.id_name().unwrap_or_default().to_string(),
                scopes: stx.scopes.clone(),
                loc: stx.loc.clone(),
            }),
        }
    }

    fn check_prim_category(
        &self,
        prim: &Prim,
        context: SyntacticCategory,
        loc: &SrcLoc,
    ) -> Result<(), ExpansionErr> {
        let allowed = match prim.category {
            SyntacticCategory::Expression => matches!(
                context,
                SyntacticCategory::Expression | SyntacticCategory::Declaration
            ),
            SyntacticCategory::Declaration => context == SyntacticCategory::Declaration,
            // Module forms are rewritten before task dispatch.
            SyntacticCategory::Module => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(ExpansionErr::WrongCategory {
                expected: context,
                got: prim.category,
                loc: loc.clone(),
            })
        }
    }

    fn check_user_category(
        &self,
        macro_category: SyntacticCategory,
        context: SyntacticCategory,
        loc: &SrcLoc,
    ) -> Result<(), ExpansionErr> {
        let allowed = macro_category == context
            || (macro_category == SyntacticCategory::Expression
                && context == SyntacticCategory::Declaration);
        if allowed {
            Ok(())
        } else {
            Err(ExpansionErr::WrongCategory {
                expected: context,
                got: macro_category,
                loc: loc.clone(),
            })
        }
    }

    // -------------------------------------------------------------------------
    // Macro invocation and hygiene
    // -------------------------------------------------------------------------

    /// The hygienic introduction rule: a fresh scope is flipped onto the
    /// whole input before the transformer runs, and onto the whole
    /// output after. Scopes present on both sides cancel; scopes the
    /// macro introduced survive.
    fn invoke_user_macro(
        &mut self,
        name: &str,
        transformer: Value,
        stx: Syntax,
        id: TaskId,
        target: NodeId,
        phase: Phase,
        category: SyntacticCategory,
        root: NodeId,
    ) -> Result<(), ExpansionErr> {
        let scope = self.fresh_scope();
        let loc = stx.loc.clone();
        self.trace.push((name.to_string(), loc.clone()));
        let flipped = stx.flip_scope(scope);
        let mut fx = Effects::default();
        let outcome = self
            .evaluator
            .apply_macro(&transformer, flipped, &mut fx)
            .map_err(|source| ExpansionErr::Eval {
                source,
                loc: loc.clone(),
            })?;
        self.route_effects(fx);
        self.finish_macro(outcome, id, target, phase, category, Some(scope), loc, root)
    }

    fn finish_macro(
        &mut self,
        outcome: MacroOutcome,
        id: TaskId,
        target: NodeId,
        phase: Phase,
        category: SyntacticCategory,
        pending_flip: Option<Scope>,
        loc: SrcLoc,
        root: NodeId,
    ) -> Result<(), ExpansionErr> {
        match outcome {
            MacroOutcome::Done(out) => {
                let out = match pending_flip {
                    Some(scope) => out.flip_scope(scope),
                    None => out,
                };
                self.enqueue(Task {
                    id,
                    target,
                    phase,
                    category,
                    pending_flip: None,
                    loc,
                    root,
                    work: Work::Expand(out),
                });
                Ok(())
            }
            MacroOutcome::Blocked(signal, k) => {
                if self.signals.contains(&signal) {
                    // Already received: resume at the next scheduler step.
                    self.enqueue(Task {
                        id,
                        target,
                        phase,
                        category,
                        pending_flip,
                        loc,
                        root,
                        work: Work::Resume { k, signal },
                    });
                } else {
                    self.park(BlockedTask {
                        id,
                        target,
                        phase,
                        category,
                        pending_flip,
                        loc,
                        root,
                        signal,
                        k,
                    });
                }
                Ok(())
            }
        }
    }

    /// Module-level macros rewrite the module form synchronously; they
    /// may only wait on signals that have already been received.
    fn invoke_module_macro(
        &mut self,
        name: &str,
        transformer: &Value,
        stx: Syntax,
    ) -> Result<Syntax, ExpansionErr> {
        let scope = self.fresh_scope();
        let loc = stx.loc.clone();
        self.trace.push((name.to_string(), loc.clone()));
        let mut fx = Effects::default();
        let mut outcome = self
            .evaluator
            .apply_macro(transformer, stx.flip_scope(scope), &mut fx)
            .map_err(|source| ExpansionErr::Eval {
                source,
                loc: loc.clone(),
            })?;
        self.route_effects(fx);
        loop {
            match outcome {
                MacroOutcome::Done(out) => return Ok(out.flip_scope(scope)),
                MacroOutcome::Blocked(signal, k) => {
                    if !self.signals.contains(&signal) {
                        let task = self.fresh_task_id();
                        return Err(ExpansionErr::StuckExpansion { task, signal });
                    }
                    let mut fx = Effects::default();
                    outcome = k.resume(signal, &mut fx).map_err(|source| ExpansionErr::Eval {
                        source,
                        loc: loc.clone(),
                    })?;
                    self.route_effects(fx);
                }
            }
        }
    }

    fn route_effects(&mut self, fx: Effects) {
        for signal in fx.sent {
            self.send_signal(signal);
        }
    }

    // -------------------------------------------------------------------------
    // Fragment installation
    // -------------------------------------------------------------------------

    /// Wire a fragment into the graph at `target`. Known constructors
    /// get arena entries; every `Sub` child becomes a new ready task
    /// targeting a fresh pending identity.
    fn install(&mut self, target: NodeId, frag: Frag, phase: Phase, root: NodeId) {
        match frag {
            Frag::Sub(stx) => {
                self.push_ready(stx, target, phase, SyntacticCategory::Expression, root)
            }
            Frag::Core(shape) => {
                let mapped = match shape {
                    CoreShape::Lam { param, body } => {
                        let body_id = self.node_ids.fresh();
                        self.install(body_id, *body, phase, root);
                        CoreShape::Lam {
                            param,
                            body: body_id,
                        }
                    }
                    CoreShape::App { fun, arg } => {
                        let fun_id = self.node_ids.fresh();
                        self.install(fun_id, *fun, phase, root);
                        let arg_id = self.node_ids.fresh();
                        self.install(arg_id, *arg, phase, root);
                        CoreShape::App {
                            fun: fun_id,
                            arg: arg_id,
                        }
                    }
                    CoreShape::Ref(v) => CoreShape::Ref(v),
                    CoreShape::Lit(l) => CoreShape::Lit(l),
                    CoreShape::Quote(s) => CoreShape::Quote(s),
                    CoreShape::Prim(p) => CoreShape::Prim(p),
                };
                self.nodes.insert(target, mapped);
            }
        }
    }

    /// Wire a ready (hole-free in practice) tree into the graph.
    fn install_tree(&mut self, target: NodeId, tree: &PartialTree) {
        if let PartialTree::Node(shape) = tree {
            let mapped = match shape {
                CoreShape::Lam { param, body } => {
                    let body_id = self.node_ids.fresh();
                    self.install_tree(body_id, body);
                    CoreShape::Lam {
                        param: *param,
                        body: body_id,
                    }
                }
                CoreShape::App { fun, arg } => {
                    let fun_id = self.node_ids.fresh();
                    self.install_tree(fun_id, fun);
                    let arg_id = self.node_ids.fresh();
                    self.install_tree(arg_id, arg);
                    CoreShape::App {
                        fun: fun_id,
                        arg: arg_id,
                    }
                }
                CoreShape::Ref(v) => CoreShape::Ref(*v),
                CoreShape::Lit(l) => CoreShape::Lit(l.clone()),
                CoreShape::Quote(s) => CoreShape::Quote(s.clone()),
                CoreShape::Prim(p) => CoreShape::Prim(*p),
            };
            self.nodes.insert(target, mapped);
        }
    }

    /// Expand a transformer expression at its definition phase + 1,
    /// through the same task system, then evaluate the finished core
    /// term to the transformer value.
    fn eval_transformer(&mut self, stx: &Syntax, phase: Phase) -> Result<Value, ExpansionErr> {
        let root = self.node_ids.fresh();
        self.push_ready(stx.clone(), root, phase, SyntacticCategory::Expression, root);
        let graph = match self.drive_inner(root)? {
            Expansion::Complete(graph) => graph,
            Expansion::Blocked { task, signal } => {
                return Err(ExpansionErr::StuckExpansion { task, signal })
            }
        };
        let core = graph.to_core().expect("driven graph is complete");
        let mut fx = Effects::default();
        let value = eval::eval_value(&core, &eval::Env::empty(), &mut fx).map_err(|source| {
            ExpansionErr::Eval {
                source,
                loc: stx.loc.clone(),
            }
        })?;
        self.route_effects(fx);
        Ok(value)
    }
}

// -----------------------------------------------------------------------------
// Shape checks
// -----------------------------------------------------------------------------
//
// The only destructors special forms and macros may use; anything else
// is a program error in the expander, not a user-facing shape.

pub fn must_be_ident(stx: &Syntax) -> Result<Ident, ExpansionErr> {
    stx.as_ident().ok_or_else(|| ExpansionErr::NotIdentifier {
        loc: stx.loc.clone(),
    })
}

pub fn must_be_empty(stx: &Syntax) -> Result<(), ExpansionErr> {
    match &stx.kind {
        SyntaxKind::List(items) if items.is_empty() => Ok(()),
        _ => Err(ExpansionErr::NotEmpty {
            loc: stx.loc.clone(),
        }),
    }
}

/// Split a non-empty list into its head and the list of the rest.
pub fn must_be_cons(stx: &Syntax) -> Result<(Syntax, Syntax), ExpansionErr> {
    match &stx.kind {
        SyntaxKind::List(items) if !items.is_empty() => {
            let head = items[0].clone();
            let rest = Syntax::list(items[1..].to_vec(), stx.scopes.clone(), stx.loc.clone());
            Ok((head, rest))
        }
        _ => Err(ExpansionErr::NotCons {
            loc: stx.loc.clone(),
        }),
    }
}

pub fn must_be_vec(stx: &Syntax, len: usize) -> Result<Vec<Syntax>, ExpansionErr> {
    match &stx.kind {
        SyntaxKind::Vec(items) if items.len() == len => Ok(items.clone()),
        _ => Err(ExpansionErr::NotRightLength {
            expected: len,
            loc: stx.loc.clone(),
        }),
    }
}

// -----------------------------------------------------------------------------
// Built-in special forms
// -----------------------------------------------------------------------------

fn app_fold(items: &[Syntax]) -> Frag {
    let mut acc = Frag::Sub(items[0].clone());
    for arg in &items[1..] {
        acc = Frag::Core(CoreShape::App {
            fun: Box::new(acc),
            arg: Box::new(Frag::Sub(arg.clone())),
        });
    }
    acc
}

/// `(lambda [x] body)`: one binder, bound under a fresh scope.
fn expand_lambda(
    ex: &mut Expander,
    stx: &Syntax,
    phase: Phase,
    _context: SyntacticCategory,
) -> Result<Frag, ExpansionErr> {
    let (_kw, rest) = must_be_cons(stx)?;
    let (binders, rest) = must_be_cons(&rest)?;
    let (body, rest) = must_be_cons(&rest)?;
    must_be_empty(&rest)?;
    let binder_items = must_be_vec(&binders, 1)?;
    let param = must_be_ident(&binder_items[0])?;

    let scope = ex.fresh_scope();
    let (_binding, var) = ex.bind_variable(&param.name, param.scopes.insert(scope), phase);
    let body = body.add_scope(scope);
    Ok(Frag::Core(CoreShape::Lam {
        param: var,
        body: Box::new(Frag::Sub(body)),
    }))
}

/// `(quote datum)`: the datum becomes a core syntax literal.
fn expand_quote(
    _ex: &mut Expander,
    stx: &Syntax,
    _phase: Phase,
    _context: SyntacticCategory,
) -> Result<Frag, ExpansionErr> {
    let (_kw, rest) = must_be_cons(stx)?;
    let (datum, rest) = must_be_cons(&rest)?;
    must_be_empty(&rest)?;
    Ok(Frag::Core(CoreShape::Quote(datum)))
}

/// `(#%app f a ...)`: explicit application, folded left.
fn expand_app(
    _ex: &mut Expander,
    stx: &Syntax,
    _phase: Phase,
    _context: SyntacticCategory,
) -> Result<Frag, ExpansionErr> {
    let (_kw, rest) = must_be_cons(stx)?;
    let (fun, args) = must_be_cons(&rest)?;
    let mut items = vec![fun];
    if let SyntaxKind::List(args) = &args.kind {
        items.extend(args.iter().cloned());
    }
    Ok(app_fold(&items))
}

/// `(let-syntax [m transformer] body)`: the transformer expands and
/// evaluates one phase up, then `m` is bound for the body under a fresh
/// scope.
fn expand_let_syntax(
    ex: &mut Expander,
    stx: &Syntax,
    phase: Phase,
    _context: SyntacticCategory,
) -> Result<Frag, ExpansionErr> {
    let (_kw, rest) = must_be_cons(stx)?;
    let (binder, rest) = must_be_cons(&rest)?;
    let (body, rest) = must_be_cons(&rest)?;
    must_be_empty(&rest)?;
    let pair = must_be_vec(&binder, 2)?;
    let name = must_be_ident(&pair[0])?;

    let transformer = ex.eval_transformer(&pair[1], phase.up())?;
    let scope = ex.fresh_scope();
    ex.bind_user_macro(
        &name.name,
        name.scopes.insert(scope),
        SyntacticCategory::Expression,
        transformer,
        phase,
    );
    Ok(Frag::Sub(body.add_scope(scope)))
}

/// `(define x expr)`: module-level variable definition.
fn expand_define(
    ex: &mut Expander,
    stx: &Syntax,
    phase: Phase,
    _context: SyntacticCategory,
) -> Result<Frag, ExpansionErr> {
    let (_kw, rest) = must_be_cons(stx)?;
    let (name_stx, rest) = must_be_cons(&rest)?;
    let (rhs, rest) = must_be_cons(&rest)?;
    must_be_empty(&rest)?;
    let name = must_be_ident(&name_stx)?;

    let (binding, var) = ex.bind_variable(&name.name, name.scopes.clone(), phase);
    ex.current_decl = Some(DeclInfo::Define {
        name: name.name,
        var,
        binding,
    });
    Ok(Frag::Sub(rhs))
}

/// `(define-syntax m transformer)`: module-level macro definition.
fn expand_define_syntax(
    ex: &mut Expander,
    stx: &Syntax,
    phase: Phase,
    _context: SyntacticCategory,
) -> Result<Frag, ExpansionErr> {
    let (_kw, rest) = must_be_cons(stx)?;
    let (name_stx, rest) = must_be_cons(&rest)?;
    let (transformer_stx, rest) = must_be_cons(&rest)?;
    must_be_empty(&rest)?;
    let name = must_be_ident(&name_stx)?;

    let transformer = ex.eval_transformer(&transformer_stx, phase.up())?;
    let binding = ex.bind_user_macro(
        &name.name,
        name.scopes.clone(),
        SyntacticCategory::Expression,
        transformer,
        phase,
    );
    ex.current_decl = Some(DeclInfo::DefineSyntax {
        name: name.name,
        binding,
    });
    // The declaration has no run-time meaning; its node is a placeholder
    // discarded by expand_declaration.
    Ok(Frag::Core(CoreShape::Lit(Literal::Bool(true))))
}

/// `(#%module decl ...)` is rewritten by `expand_module_body` before any
/// task dispatch; reaching the prim means it was used out of place.
fn expand_module_form(
    _ex: &mut Expander,
    stx: &Syntax,
    _phase: Phase,
    context: SyntacticCategory,
) -> Result<Frag, ExpansionErr> {
    Err(ExpansionErr::WrongCategory {
        expected: context,
        got: SyntacticCategory::Module,
        loc: stx.loc.clone(),
    })
}
