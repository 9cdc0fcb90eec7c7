//! Stack-cursor tree builder
//!
//! Containers push a scope, leaves attach into the current scope, `close`
//! pops. `build` auto-closes whatever remains, assigns slash-joined
//! fullnames and runs structural validation. Fluent methods never panic;
//! the first structural misuse is recorded and reported by `build`.
//!
//! Custom node kinds attach through [`TreeBuilder::attach_leaf`] and
//! [`TreeBuilder::attach_container`] with a [`BuildSpec`] implementation,
//! the same mechanism every built-in uses.

use crate::behavior::{Behavior, Condition, DataFactory, RetrySleep, Source, Target};
use crate::context::{Blackboard, Context};
use crate::error::{Error, Result};
use crate::node::{invoke, Meta, Node, NodeRef};
use crate::nodes::cache::KeyFn;
use crate::nodes::{
    AssertNode, CacherNode, ConstantNode, ElseNode, FailureNode, FallbackNode, ForceFailNode,
    ForceOkNode, FunctionNode, GatherNode, IfNode, InvertNode, LogMessage, LogNode,
    MappedSubtreeNode, ParallelNode, ParseJsonNode, RandomSelectorNode, RetryNode, ReturnNode,
    SelectorNode, SequenceNode, SubtreeNode, TerminableNode, TimeoutNode, WhileNode, WrapperNode,
    WriteBlackboardNode,
};
use crate::outcome::Outcome;
use crate::trace::TraceHandle;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tasktree_store::KvStore;

/// An immutable, reusable tree. Cloning shares the root; concurrent runs
/// against separate contexts are fine.
pub struct Tree<B: Blackboard> {
    name: String,
    root: NodeRef<B>,
}

impl<B: Blackboard> Clone for Tree<B> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            root: self.root.clone(),
        }
    }
}

impl<B: Blackboard> Tree<B> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &NodeRef<B> {
        &self.root
    }

    pub(crate) fn into_root(self) -> NodeRef<B> {
        self.root
    }

    /// Tick the root under the context's trace root.
    pub async fn run(&self, ctx: &Context<B>) -> Result<Outcome> {
        invoke(&self.root, ctx, ctx.trace_root(), &Outcome::none()).await
    }
}

/// One node kind's build recipe: a kind tag plus construction from the
/// children collected in its scope. Arity checks live here so they run at
/// build time, never at tick time.
pub trait BuildSpec<B: Blackboard>: Send {
    fn kind(&self) -> &'static str;

    fn build(self: Box<Self>, meta: Meta, children: Vec<NodeRef<B>>) -> Result<NodeRef<B>>;
}

struct Frame<B: Blackboard> {
    spec: Box<dyn BuildSpec<B>>,
    meta: Meta,
    children: Vec<NodeRef<B>>,
}

/// Fluent builder; see the module docs for the scope discipline.
pub struct TreeBuilder<B: Blackboard> {
    name: String,
    stack: Vec<Frame<B>>,
    root: Option<NodeRef<B>>,
    pending_name: Option<String>,
    error: Option<Error>,
}

impl<B: Blackboard> TreeBuilder<B> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stack: Vec::new(),
            root: None,
            pending_name: None,
            error: None,
        }
    }

    /// Name the next attached node. Unnamed nodes get `kind` plus their
    /// sibling index.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.pending_name = Some(name.into());
        self
    }

    fn fail(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn next_meta(&mut self, kind: &'static str) -> Meta {
        let (prefix, index) = match self.stack.last() {
            Some(frame) => (frame.meta.fullname.clone(), frame.children.len()),
            None => (self.name.clone(), 0),
        };
        let name = self
            .pending_name
            .take()
            .unwrap_or_else(|| format!("{kind}{index}"));
        let fullname = format!("{prefix}/{name}");
        Meta { name, fullname }
    }

    fn place(&mut self, node: NodeRef<B>) {
        match self.stack.last_mut() {
            Some(frame) => frame.children.push(node),
            None => {
                if self.root.is_some() {
                    self.fail(Error::build("tree already has a root node"));
                } else {
                    self.root = Some(node);
                }
            }
        }
    }

    /// Attach a childless node built from `spec`.
    pub fn attach_leaf(mut self, spec: impl BuildSpec<B> + 'static) -> Self {
        if self.error.is_some() {
            return self;
        }
        let meta = self.next_meta(spec.kind());
        match Box::new(spec).build(meta, Vec::new()) {
            Ok(node) => self.place(node),
            Err(error) => self.fail(error),
        }
        self
    }

    /// Open a container scope; nodes attached next become its children
    /// until [`close`](Self::close).
    pub fn attach_container(mut self, spec: impl BuildSpec<B> + 'static) -> Self {
        if self.error.is_some() {
            return self;
        }
        let meta = self.next_meta(spec.kind());
        self.stack.push(Frame {
            spec: Box::new(spec),
            meta,
            children: Vec::new(),
        });
        self
    }

    fn close_one(&mut self) {
        let Some(frame) = self.stack.pop() else {
            self.fail(Error::build("close called with no open scope"));
            return;
        };
        match frame.spec.build(frame.meta, frame.children) {
            Ok(node) => self.place(node),
            Err(error) => self.fail(error),
        }
    }

    /// Close the innermost open scope.
    pub fn close(mut self) -> Self {
        if self.error.is_none() {
            self.close_one();
        }
        self
    }

    /// Close remaining scopes, validate, return the finished tree.
    pub fn build(mut self) -> Result<Tree<B>> {
        while self.error.is_none() && !self.stack.is_empty() {
            self.close_one();
        }
        if let Some(error) = self.error {
            return Err(error);
        }
        match self.root {
            Some(root) => Ok(Tree {
                name: self.name,
                root,
            }),
            None => Err(Error::build("tree has no nodes")),
        }
    }

    // --- composites ---

    pub fn sequence(self) -> Self {
        self.attach_container(SequenceSpec)
    }

    pub fn selector(self) -> Self {
        self.attach_container(SelectorSpec)
    }

    pub fn random_selector(self) -> Self {
        self.attach_container(RandomSelectorSpec {
            weights: None,
            seed: None,
        })
    }

    pub fn random_selector_with(self, weights: Option<Vec<f64>>, seed: Option<u64>) -> Self {
        self.attach_container(RandomSelectorSpec { weights, seed })
    }

    pub fn parallel(self) -> Self {
        self.attach_container(ParallelSpec { limit: None })
    }

    /// Parallel bounded by a semaphore of `limit` permits. Zero is a build
    /// error.
    pub fn parallel_limited(self, limit: usize) -> Self {
        self.attach_container(ParallelSpec { limit: Some(limit) })
    }

    pub fn while_loop(self, condition: impl Into<Condition<B>>) -> Self {
        self.attach_container(WhileSpec {
            condition: condition.into(),
            max_loops: None,
        })
    }

    pub fn while_loop_bounded(
        self,
        condition: impl Into<Condition<B>>,
        max_loops: usize,
    ) -> Self {
        self.attach_container(WhileSpec {
            condition: condition.into(),
            max_loops: Some(max_loops),
        })
    }

    /// Gather: the factory computes (trees, boards) pairs at tick time.
    pub fn gather<C, F>(self, factory: F) -> Self
    where
        C: Blackboard,
        F: Fn(&B) -> (Vec<Tree<C>>, Vec<C>) + Send + Sync + 'static,
    {
        self.attach_leaf(GatherSpec {
            factory: Box::new(factory),
            limit: None,
        })
    }

    pub fn gather_limited<C, F>(self, factory: F, limit: usize) -> Self
    where
        C: Blackboard,
        F: Fn(&B) -> (Vec<Tree<C>>, Vec<C>) + Send + Sync + 'static,
    {
        self.attach_leaf(GatherSpec {
            factory: Box::new(factory),
            limit: Some(limit),
        })
    }

    // --- branching ---

    /// If: first child is the then-branch, an optional `else_branch` scope
    /// is the second.
    pub fn when(self, condition: impl Into<Condition<B>>) -> Self {
        self.attach_container(IfSpec {
            condition: condition.into(),
        })
    }

    /// Else-branch of the innermost `when` scope. Legal only there.
    pub fn else_branch(mut self) -> Self {
        if self.error.is_some() {
            return self;
        }
        let legal = self
            .stack
            .last()
            .is_some_and(|f| f.spec.kind() == "If" && f.children.len() == 1);
        if !legal {
            self.fail(Error::build(
                "else_branch is only legal directly inside a when scope with a then-branch",
            ));
            return self;
        }
        self.attach_container(ElseSpec)
    }

    // --- decorators ---

    pub fn invert(self) -> Self {
        self.attach_container(InvertSpec)
    }

    pub fn force_ok(self) -> Self {
        self.attach_container(ForceOkSpec { data: None })
    }

    pub fn force_ok_with<F>(self, data: F) -> Self
    where
        F: Fn(&B) -> Value + Send + Sync + 'static,
    {
        self.attach_container(ForceOkSpec {
            data: Some(Box::new(data)),
        })
    }

    pub fn force_fail(self) -> Self {
        self.attach_container(ForceFailSpec { data: None })
    }

    pub fn force_fail_with<F>(self, data: F) -> Self
    where
        F: Fn(&B) -> Value + Send + Sync + 'static,
    {
        self.attach_container(ForceFailSpec {
            data: Some(Box::new(data)),
        })
    }

    /// Keep the child's status, replace its data.
    pub fn returning<F>(self, data: F) -> Self
    where
        F: Fn(&B) -> Value + Send + Sync + 'static,
    {
        self.attach_container(ReturnSpec {
            data: Box::new(data),
        })
    }

    pub fn retry(self, max_tries: usize) -> Self {
        self.attach_container(RetrySpec {
            max_tries,
            sleep: RetrySleep::None,
        })
    }

    pub fn retry_with(self, max_tries: usize, sleep: RetrySleep) -> Self {
        self.attach_container(RetrySpec { max_tries, sleep })
    }

    /// Timeout: one primary child, optionally one fallback child.
    pub fn timeout(self, duration: Duration) -> Self {
        self.attach_container(TimeoutSpec { duration })
    }

    pub fn terminable<F>(self, signal_key: F, options: TerminableOptions) -> Self
    where
        F: Fn(&B) -> String + Send + Sync + 'static,
    {
        self.attach_container(TerminableSpec {
            signal_key: Box::new(signal_key),
            options,
        })
    }

    /// Fallback branch of the innermost `terminable` scope. Legal only
    /// there.
    pub fn fallback(mut self) -> Self {
        if self.error.is_some() {
            return self;
        }
        let legal = self
            .stack
            .last()
            .is_some_and(|f| f.spec.kind() == "Terminable" && f.children.len() == 1);
        if !legal {
            self.fail(Error::build(
                "fallback is only legal directly inside a terminable scope with a primary child",
            ));
            return self;
        }
        self.attach_container(FallbackSpec)
    }

    pub fn cacher<F>(self, key_fn: F, options: CacherOptions<B>) -> Self
    where
        F: Fn(&B) -> String + Send + Sync + 'static,
    {
        self.attach_container(CacherSpec {
            key_fn: Box::new(key_fn),
            options,
        })
    }

    /// Bracket the child with caller code. The delegate must drive the
    /// child itself through [`invoke`](crate::node::invoke).
    pub fn wrapper<F, Fut>(self, wrap: F) -> Self
    where
        F: Fn(NodeRef<B>, Context<B>, TraceHandle, Outcome) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Outcome>> + Send + 'static,
    {
        self.attach_container(WrapperSpec {
            wrap: Box::new(move |node, ctx, tracer, prev| Box::pin(wrap(node, ctx, tracer, prev))),
        })
    }

    /// Embed a prebuilt tree, sharing this tree's board.
    pub fn subtree(self, tree: Tree<B>) -> Self {
        self.attach_leaf(SubtreeSpec { tree })
    }

    /// Embed a prebuilt tree over its own board, derived from this tree's
    /// board at tick time. Parent board mutations do not leak back.
    pub fn subtree_mapped<C, F>(self, tree: Tree<C>, board_factory: F) -> Self
    where
        C: Blackboard,
        F: Fn(&B) -> C + Send + Sync + 'static,
    {
        self.attach_leaf(MappedSubtreeSpec {
            tree,
            board_factory: Box::new(board_factory),
        })
    }

    // --- leaves ---

    pub fn function(self, behavior: Behavior<B>) -> Self {
        self.attach_leaf(FunctionSpec { behavior })
    }

    pub fn assert_that<F>(self, predicate: F) -> Self
    where
        F: Fn(&B) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.attach_leaf(AssertSpec {
            predicate: Box::new(predicate),
        })
    }

    /// Write the previous sibling's data to the board, passing the
    /// previous outcome through.
    pub fn write_blackboard(self, target: impl Into<Target<B>>) -> Self {
        self.attach_leaf(WriteBlackboardSpec {
            target: target.into(),
        })
    }

    /// Parse the previous sibling's data as lenient JSON into `dst`.
    pub fn parse_json(self, dst: impl Into<Target<B>>) -> Self {
        self.attach_leaf(ParseJsonSpec {
            src: Source::Prev,
            dst: dst.into(),
            loader: None,
        })
    }

    pub fn parse_json_from(
        self,
        src: impl Into<Source<B>>,
        dst: impl Into<Target<B>>,
    ) -> Self {
        self.attach_leaf(ParseJsonSpec {
            src: src.into(),
            dst: dst.into(),
            loader: None,
        })
    }

    /// Parse with a caller-supplied loader instead of the built-in lenient
    /// parser. The loader returning None fails the node.
    pub fn parse_json_with<F>(
        self,
        src: impl Into<Source<B>>,
        dst: impl Into<Target<B>>,
        loader: F,
    ) -> Self
    where
        F: Fn(&str) -> Option<Value> + Send + Sync + 'static,
    {
        self.attach_leaf(ParseJsonSpec {
            src: src.into(),
            dst: dst.into(),
            loader: Some(Box::new(loader)),
        })
    }

    pub fn log(self, message: impl Into<String>) -> Self {
        self.attach_leaf(LogSpec {
            message: LogMessage::Literal(message.into()),
        })
    }

    pub fn log_from<F>(self, message: F) -> Self
    where
        F: Fn(&B) -> String + Send + Sync + 'static,
    {
        self.attach_leaf(LogSpec {
            message: LogMessage::Derived(Box::new(message)),
        })
    }

    pub fn failure(self) -> Self {
        self.attach_leaf(FailureSpec)
    }

    pub fn constant(self, value: impl Into<Value>) -> Self {
        self.attach_leaf(ConstantSpec {
            value: value.into(),
        })
    }
}

/// Cacher configuration beyond the key function.
pub struct CacherOptions<B> {
    pub expiration: Option<Duration>,
    pub validator: Option<KeyFn<B>>,
    pub store: Option<Arc<dyn KvStore>>,
}

impl<B> Default for CacherOptions<B> {
    fn default() -> Self {
        Self {
            expiration: None,
            validator: None,
            store: None,
        }
    }
}

impl<B> CacherOptions<B> {
    pub fn expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&B) -> String + Send + Sync + 'static,
    {
        self.validator = Some(Box::new(validator));
        self
    }

    pub fn store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }
}

/// Terminable configuration beyond the signal key function.
pub struct TerminableOptions {
    pub monitor_interval: Duration,
    pub store: Option<Arc<dyn KvStore>>,
}

impl Default for TerminableOptions {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_millis(100),
            store: None,
        }
    }
}

impl TerminableOptions {
    pub fn monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }
}

// --- built-in build specs ---

fn exactly_one<B: Blackboard>(
    kind: &'static str,
    meta: &Meta,
    mut children: Vec<NodeRef<B>>,
) -> Result<NodeRef<B>> {
    if children.len() != 1 {
        return Err(Error::bad_arity(
            kind,
            meta.name.clone(),
            "exactly 1",
            children.len(),
        ));
    }
    Ok(children.remove(0))
}

fn one_or_two<B: Blackboard>(
    kind: &'static str,
    meta: &Meta,
    children: &[NodeRef<B>],
) -> Result<()> {
    if children.is_empty() || children.len() > 2 {
        return Err(Error::bad_arity(
            kind,
            meta.name.clone(),
            "1 or 2",
            children.len(),
        ));
    }
    Ok(())
}

struct SequenceSpec;

impl<B: Blackboard> BuildSpec<B> for SequenceSpec {
    fn kind(&self) -> &'static str {
        "Sequence"
    }

    fn build(self: Box<Self>, meta: Meta, children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        Ok(Arc::new(SequenceNode { meta, children }))
    }
}

struct SelectorSpec;

impl<B: Blackboard> BuildSpec<B> for SelectorSpec {
    fn kind(&self) -> &'static str {
        "Selector"
    }

    fn build(self: Box<Self>, meta: Meta, children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        Ok(Arc::new(SelectorNode { meta, children }))
    }
}

struct RandomSelectorSpec {
    weights: Option<Vec<f64>>,
    seed: Option<u64>,
}

impl<B: Blackboard> BuildSpec<B> for RandomSelectorSpec {
    fn kind(&self) -> &'static str {
        "RandomSelector"
    }

    fn build(self: Box<Self>, meta: Meta, children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        if let Some(weights) = &self.weights {
            if weights.len() != children.len() {
                return Err(Error::build(format!(
                    "random selector '{}' has {} weights for {} children",
                    meta.name,
                    weights.len(),
                    children.len()
                )));
            }
            if weights.iter().any(|w| *w <= 0.0) {
                return Err(Error::build(format!(
                    "random selector '{}' weights must be positive",
                    meta.name
                )));
            }
        }
        Ok(Arc::new(RandomSelectorNode {
            meta,
            children,
            weights: self.weights,
            seed: self.seed,
        }))
    }
}

struct ParallelSpec {
    limit: Option<usize>,
}

impl<B: Blackboard> BuildSpec<B> for ParallelSpec {
    fn kind(&self) -> &'static str {
        "Parallel"
    }

    fn build(self: Box<Self>, meta: Meta, children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        if self.limit == Some(0) {
            return Err(Error::build(format!(
                "parallel '{}' concurrency limit must be positive",
                meta.name
            )));
        }
        Ok(Arc::new(ParallelNode {
            meta,
            children,
            concurrency_limit: self.limit,
        }))
    }
}

struct WhileSpec<B> {
    condition: Condition<B>,
    max_loops: Option<usize>,
}

impl<B: Blackboard> BuildSpec<B> for WhileSpec<B> {
    fn kind(&self) -> &'static str {
        "While"
    }

    fn build(self: Box<Self>, meta: Meta, children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        let body = exactly_one("While", &meta, children)?;
        Ok(Arc::new(WhileNode {
            meta,
            body,
            condition: self.condition,
            max_loops: self.max_loops,
        }))
    }
}

struct GatherSpec<B, C: Blackboard> {
    factory: Box<dyn Fn(&B) -> (Vec<Tree<C>>, Vec<C>) + Send + Sync>,
    limit: Option<usize>,
}

impl<B: Blackboard, C: Blackboard> BuildSpec<B> for GatherSpec<B, C> {
    fn kind(&self) -> &'static str {
        "Gather"
    }

    fn build(self: Box<Self>, meta: Meta, _children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        if self.limit == Some(0) {
            return Err(Error::build(format!(
                "gather '{}' concurrency limit must be positive",
                meta.name
            )));
        }
        Ok(Arc::new(GatherNode {
            meta,
            factory: self.factory,
            concurrency_limit: self.limit,
        }))
    }
}

struct IfSpec<B> {
    condition: Condition<B>,
}

impl<B: Blackboard> BuildSpec<B> for IfSpec<B> {
    fn kind(&self) -> &'static str {
        "If"
    }

    fn build(self: Box<Self>, meta: Meta, children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        one_or_two("If", &meta, &children)?;
        if let Some(second) = children.get(1) {
            if second.kind() != "Else" {
                return Err(Error::build(format!(
                    "the second child of if '{}' must be an else branch",
                    meta.name
                )));
            }
        }
        Ok(Arc::new(IfNode {
            meta,
            condition: self.condition,
            children,
        }))
    }
}

struct ElseSpec;

impl<B: Blackboard> BuildSpec<B> for ElseSpec {
    fn kind(&self) -> &'static str {
        "Else"
    }

    fn build(self: Box<Self>, meta: Meta, children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        let child = exactly_one("Else", &meta, children)?;
        Ok(Arc::new(ElseNode { meta, child }))
    }
}

struct InvertSpec;

impl<B: Blackboard> BuildSpec<B> for InvertSpec {
    fn kind(&self) -> &'static str {
        "Invert"
    }

    fn build(self: Box<Self>, meta: Meta, children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        let child = exactly_one("Invert", &meta, children)?;
        Ok(Arc::new(InvertNode { meta, child }))
    }
}

struct ForceOkSpec<B> {
    data: Option<DataFactory<B>>,
}

impl<B: Blackboard> BuildSpec<B> for ForceOkSpec<B> {
    fn kind(&self) -> &'static str {
        "ForceOk"
    }

    fn build(self: Box<Self>, meta: Meta, children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        let child = exactly_one("ForceOk", &meta, children)?;
        Ok(Arc::new(ForceOkNode {
            meta,
            child,
            data: self.data,
        }))
    }
}

struct ForceFailSpec<B> {
    data: Option<DataFactory<B>>,
}

impl<B: Blackboard> BuildSpec<B> for ForceFailSpec<B> {
    fn kind(&self) -> &'static str {
        "ForceFail"
    }

    fn build(self: Box<Self>, meta: Meta, children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        let child = exactly_one("ForceFail", &meta, children)?;
        Ok(Arc::new(ForceFailNode {
            meta,
            child,
            data: self.data,
        }))
    }
}

struct ReturnSpec<B> {
    data: DataFactory<B>,
}

impl<B: Blackboard> BuildSpec<B> for ReturnSpec<B> {
    fn kind(&self) -> &'static str {
        "Return"
    }

    fn build(self: Box<Self>, meta: Meta, children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        let child = exactly_one("Return", &meta, children)?;
        Ok(Arc::new(ReturnNode {
            meta,
            child,
            data: self.data,
        }))
    }
}

struct RetrySpec {
    max_tries: usize,
    sleep: RetrySleep,
}

impl<B: Blackboard> BuildSpec<B> for RetrySpec {
    fn kind(&self) -> &'static str {
        "Retry"
    }

    fn build(self: Box<Self>, meta: Meta, children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        if self.max_tries == 0 {
            return Err(Error::build(format!(
                "retry '{}' max_tries must be positive",
                meta.name
            )));
        }
        let child = exactly_one("Retry", &meta, children)?;
        Ok(Arc::new(RetryNode {
            meta,
            child,
            max_tries: self.max_tries,
            sleep: self.sleep,
        }))
    }
}

struct TimeoutSpec {
    duration: Duration,
}

impl<B: Blackboard> BuildSpec<B> for TimeoutSpec {
    fn kind(&self) -> &'static str {
        "Timeout"
    }

    fn build(self: Box<Self>, meta: Meta, children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        one_or_two("Timeout", &meta, &children)?;
        Ok(Arc::new(TimeoutNode {
            meta,
            duration: self.duration,
            children,
        }))
    }
}

struct TerminableSpec<B> {
    signal_key: Box<dyn Fn(&B) -> String + Send + Sync>,
    options: TerminableOptions,
}

impl<B: Blackboard> BuildSpec<B> for TerminableSpec<B> {
    fn kind(&self) -> &'static str {
        "Terminable"
    }

    fn build(self: Box<Self>, meta: Meta, children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        one_or_two("Terminable", &meta, &children)?;
        if let Some(second) = children.get(1) {
            if second.kind() != "Fallback" {
                return Err(Error::build(format!(
                    "the second child of terminable '{}' must be a fallback branch",
                    meta.name
                )));
            }
        }
        Ok(Arc::new(TerminableNode {
            meta,
            signal_key: self.signal_key,
            monitor_interval: self.options.monitor_interval,
            store: self.options.store,
            children,
        }))
    }
}

struct FallbackSpec;

impl<B: Blackboard> BuildSpec<B> for FallbackSpec {
    fn kind(&self) -> &'static str {
        "Fallback"
    }

    fn build(self: Box<Self>, meta: Meta, children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        let child = exactly_one("Fallback", &meta, children)?;
        Ok(Arc::new(FallbackNode { meta, child }))
    }
}

struct CacherSpec<B> {
    key_fn: KeyFn<B>,
    options: CacherOptions<B>,
}

impl<B: Blackboard> BuildSpec<B> for CacherSpec<B> {
    fn kind(&self) -> &'static str {
        "Cacher"
    }

    fn build(self: Box<Self>, meta: Meta, children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        let child = exactly_one("Cacher", &meta, children)?;
        Ok(Arc::new(CacherNode {
            meta,
            child,
            key_fn: self.key_fn,
            validator: self.options.validator,
            expiration: self.options.expiration,
            store: self.options.store,
        }))
    }
}

struct WrapperSpec<B: Blackboard> {
    wrap: crate::nodes::decorator::WrapFn<B>,
}

impl<B: Blackboard> BuildSpec<B> for WrapperSpec<B> {
    fn kind(&self) -> &'static str {
        "Wrapper"
    }

    fn build(self: Box<Self>, meta: Meta, children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        let child = exactly_one("Wrapper", &meta, children)?;
        Ok(Arc::new(WrapperNode {
            meta,
            child,
            wrap: self.wrap,
        }))
    }
}

struct SubtreeSpec<B: Blackboard> {
    tree: Tree<B>,
}

impl<B: Blackboard> BuildSpec<B> for SubtreeSpec<B> {
    fn kind(&self) -> &'static str {
        "Subtree"
    }

    fn build(self: Box<Self>, meta: Meta, _children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        Ok(Arc::new(SubtreeNode::from_tree(meta, self.tree)))
    }
}

struct MappedSubtreeSpec<B, C: Blackboard> {
    tree: Tree<C>,
    board_factory: Box<dyn Fn(&B) -> C + Send + Sync>,
}

impl<B: Blackboard, C: Blackboard> BuildSpec<B> for MappedSubtreeSpec<B, C> {
    fn kind(&self) -> &'static str {
        "Subtree"
    }

    fn build(self: Box<Self>, meta: Meta, _children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        Ok(Arc::new(MappedSubtreeNode {
            meta,
            root: self.tree.into_root(),
            board_factory: self.board_factory,
        }))
    }
}

struct FunctionSpec<B> {
    behavior: Behavior<B>,
}

impl<B: Blackboard> BuildSpec<B> for FunctionSpec<B> {
    fn kind(&self) -> &'static str {
        "Function"
    }

    fn build(self: Box<Self>, meta: Meta, _children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        Ok(Arc::new(FunctionNode {
            meta,
            behavior: self.behavior,
        }))
    }
}

struct AssertSpec<B> {
    predicate: Box<dyn Fn(&B) -> anyhow::Result<bool> + Send + Sync>,
}

impl<B: Blackboard> BuildSpec<B> for AssertSpec<B> {
    fn kind(&self) -> &'static str {
        "Assert"
    }

    fn build(self: Box<Self>, meta: Meta, _children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        Ok(Arc::new(AssertNode {
            meta,
            predicate: self.predicate,
        }))
    }
}

struct WriteBlackboardSpec<B> {
    target: Target<B>,
}

impl<B: Blackboard> BuildSpec<B> for WriteBlackboardSpec<B> {
    fn kind(&self) -> &'static str {
        "WriteBlackboard"
    }

    fn build(self: Box<Self>, meta: Meta, _children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        Ok(Arc::new(WriteBlackboardNode {
            meta,
            target: self.target,
        }))
    }
}

struct ParseJsonSpec<B> {
    src: Source<B>,
    dst: Target<B>,
    loader: Option<Box<dyn Fn(&str) -> Option<Value> + Send + Sync>>,
}

impl<B: Blackboard> BuildSpec<B> for ParseJsonSpec<B> {
    fn kind(&self) -> &'static str {
        "ParseJSON"
    }

    fn build(self: Box<Self>, meta: Meta, _children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        Ok(Arc::new(ParseJsonNode {
            meta,
            src: self.src,
            dst: self.dst,
            loader: self.loader,
        }))
    }
}

struct LogSpec<B> {
    message: LogMessage<B>,
}

impl<B: Blackboard> BuildSpec<B> for LogSpec<B> {
    fn kind(&self) -> &'static str {
        "Log"
    }

    fn build(self: Box<Self>, meta: Meta, _children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        Ok(Arc::new(LogNode {
            meta,
            message: self.message,
        }))
    }
}

struct FailureSpec;

impl<B: Blackboard> BuildSpec<B> for FailureSpec {
    fn kind(&self) -> &'static str {
        "Failure"
    }

    fn build(self: Box<Self>, meta: Meta, _children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        Ok(Arc::new(FailureNode { meta }))
    }
}

struct ConstantSpec {
    value: Value,
}

impl<B: Blackboard> BuildSpec<B> for ConstantSpec {
    fn kind(&self) -> &'static str {
        "Constant"
    }

    fn build(self: Box<Self>, meta: Meta, _children: Vec<NodeRef<B>>) -> Result<NodeRef<B>> {
        Ok(Arc::new(ConstantNode {
            meta,
            value: self.value,
        }))
    }
}
