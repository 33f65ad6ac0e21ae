//! Branching-search strategy.
//!
//! Builds a tree of candidate reasoning steps level by level, scores every
//! root-to-leaf path, then acts on and answers from the best one. Nodes live
//! in an arena and refer to their parent by index, so a path is recovered by
//! walking parent links from the leaf.
//!
//! Generation calls inside a phase may run concurrently (`parallelism`), but
//! results are consumed in input order, so the tree and the ranking are the
//! same as with sequential execution.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};

use crate::intent::{parse_path_evaluation, parse_string_list, PathEvaluation};
use crate::llm::{GenerationError, GenerationOptions, Generator};
use crate::tools::CapabilityRegistry;

use super::log::{LogEntryType, RunLog, RunOutcome};
use super::synthesis::{act, catalog_if_any, decide, synthesize};
use super::{prompt, Strategy, StrategyKind};

/// Index of a node inside its [`ReasoningTree`].
pub type NodeId = usize;

#[derive(Debug, Clone)]
pub struct ReasoningNode {
    pub content: String,
    pub depth: usize,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub score: Option<f64>,
    pub evaluation: Option<String>,
}

/// Arena of reasoning nodes rooted at the query.
#[derive(Debug, Clone)]
pub struct ReasoningTree {
    nodes: Vec<ReasoningNode>,
}

impl ReasoningTree {
    pub fn new(root_content: impl Into<String>) -> Self {
        Self {
            nodes: vec![ReasoningNode {
                content: root_content.into(),
                depth: 0,
                parent: None,
                children: Vec::new(),
                score: None,
                evaluation: None,
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        0
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &ReasoningNode {
        &self.nodes[id]
    }

    pub fn add_child(&mut self, parent: NodeId, content: impl Into<String>) -> NodeId {
        let id = self.nodes.len();
        let depth = self.nodes[parent].depth + 1;
        self.nodes.push(ReasoningNode {
            content: content.into(),
            depth,
            parent: Some(parent),
            children: Vec::new(),
            score: None,
            evaluation: None,
        });
        self.nodes[parent].children.push(id);
        id
    }

    fn record_evaluation(&mut self, id: NodeId, evaluation: &PathEvaluation) {
        let node = &mut self.nodes[id];
        node.score = Some(evaluation.score);
        node.evaluation = Some(evaluation.evaluation.clone());
    }

    /// Contents from the root down to `id`, inclusive.
    pub fn path(&self, id: NodeId) -> Vec<String> {
        let mut contents = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = &self.nodes[node_id];
            contents.push(node.content.clone());
            current = node.parent;
        }
        contents.reverse();
        contents
    }

    /// Leaves in depth-first construction order.
    pub fn leaves(&self) -> Vec<NodeId> {
        let mut leaves = Vec::new();
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            let children = &self.nodes[id].children;
            if children.is_empty() {
                leaves.push(id);
            } else {
                stack.extend(children.iter().rev());
            }
        }
        leaves
    }
}

/// A scored root-to-leaf path.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatedPath {
    pub leaf: NodeId,
    pub path: Vec<String>,
    pub score: f64,
    pub evaluation: String,
}

/// Highest score first; equal scores keep construction order.
pub fn rank_paths(mut paths: Vec<EvaluatedPath>) -> Vec<EvaluatedPath> {
    paths.sort_by(|a, b| b.score.total_cmp(&a.score));
    paths
}

fn placeholder_candidates(count: usize) -> Vec<String> {
    (1..=count)
        .map(|i| format!("Approach {} for the problem", i))
        .collect()
}

/// Run `prompts` through the generator, at most `parallelism` at a time,
/// returning responses in prompt order.
async fn generate_all(
    generator: &Arc<dyn Generator>,
    prompts: Vec<String>,
    options: GenerationOptions,
    parallelism: usize,
) -> Result<Vec<String>, GenerationError> {
    stream::iter(prompts.into_iter().map(|p| {
        let generator = Arc::clone(generator);
        async move { generator.generate(&p, options).await }
    }))
    .buffered(parallelism.max(1))
    .try_collect()
    .await
}

/// Tree-of-thought search over candidate reasoning steps.
pub struct BranchingSearchStrategy {
    generator: Arc<dyn Generator>,
    registry: Arc<CapabilityRegistry>,
    num_branches: usize,
    max_depth: usize,
    criteria: Vec<String>,
    parallelism: usize,
    observation_items: usize,
}

impl BranchingSearchStrategy {
    pub fn new(
        generator: Arc<dyn Generator>,
        registry: Arc<CapabilityRegistry>,
        num_branches: usize,
        max_depth: usize,
        criteria: Vec<String>,
        parallelism: usize,
        observation_items: usize,
    ) -> Self {
        Self {
            generator,
            registry,
            num_branches,
            max_depth,
            criteria,
            parallelism,
            observation_items,
        }
    }

    /// Build calls (bounded by `B + B^2 + ... + B^D`), one evaluation per
    /// leaf (`B^D`), one decision and one answer.
    pub fn max_generation_calls(num_branches: usize, max_depth: usize) -> usize {
        let power = |exp: usize| {
            u32::try_from(exp)
                .ok()
                .and_then(|e| num_branches.checked_pow(e))
                .unwrap_or(usize::MAX)
        };
        let build = (1..=max_depth).fold(0usize, |acc, i| acc.saturating_add(power(i)));
        build.saturating_add(power(max_depth)).saturating_add(2)
    }

    /// Build the tree and rank every leaf path, best first.
    pub async fn explore(
        &self,
        query: &str,
        log: &mut RunLog,
    ) -> Result<(ReasoningTree, Vec<EvaluatedPath>), GenerationError> {
        let tree = self.build_tree(query, log).await?;
        self.evaluate_leaves(query, tree, log).await
    }

    async fn build_tree(&self, query: &str, log: &mut RunLog) -> Result<ReasoningTree, GenerationError> {
        let mut tree = ReasoningTree::new(format!("Query: {}", query));
        let mut frontier = vec![tree.root()];

        for depth in 1..=self.max_depth {
            tracing::info!(
                "Expanding {} node(s) at depth {}/{}",
                frontier.len(),
                depth,
                self.max_depth
            );
            let prompts = frontier
                .iter()
                .map(|&id| {
                    let path = prompt::number_steps(&tree.path(id));
                    prompt::branches(query, &path, self.num_branches, depth)
                })
                .collect();
            let responses = generate_all(&self.generator, prompts, prompt::BRANCH, self.parallelism).await?;

            let mut next = Vec::with_capacity(frontier.len().saturating_mul(self.num_branches));
            for (&parent, response) in frontier.iter().zip(responses) {
                for candidate in self.candidates(&response) {
                    log.push(LogEntryType::Thinking, &candidate);
                    next.push(tree.add_child(parent, candidate));
                }
            }
            frontier = next;
        }

        Ok(tree)
    }

    fn candidates(&self, response: &str) -> Vec<String> {
        match parse_string_list(response) {
            Ok(mut items) => {
                if items.len() < self.num_branches {
                    tracing::debug!(
                        "Got {} of {} requested branches",
                        items.len(),
                        self.num_branches
                    );
                }
                items.truncate(self.num_branches);
                items
            }
            Err(e) => {
                tracing::warn!("Could not parse branch candidates ({}), using placeholders", e);
                placeholder_candidates(self.num_branches)
            }
        }
    }

    async fn evaluate_leaves(
        &self,
        query: &str,
        mut tree: ReasoningTree,
        log: &mut RunLog,
    ) -> Result<(ReasoningTree, Vec<EvaluatedPath>), GenerationError> {
        let leaves = tree.leaves();
        tracing::info!("Evaluating {} path(s)", leaves.len());

        let paths: Vec<Vec<String>> = leaves.iter().map(|&leaf| tree.path(leaf)).collect();
        let prompts = paths
            .iter()
            .map(|path| prompt::evaluate(query, &prompt::number_steps(path), &self.criteria))
            .collect();
        let responses = generate_all(&self.generator, prompts, prompt::EVALUATE, self.parallelism).await?;

        let mut evaluated = Vec::with_capacity(leaves.len());
        for ((leaf, path), response) in leaves.into_iter().zip(paths).zip(responses) {
            let evaluation = parse_path_evaluation(&response).unwrap_or_else(|e| {
                tracing::warn!("Could not parse path evaluation ({}), scoring neutral", e);
                PathEvaluation::neutral()
            });
            log.push(
                LogEntryType::Evaluation,
                format!("{:.1}/10: {}", evaluation.score, evaluation.evaluation),
            );
            tree.record_evaluation(leaf, &evaluation);
            evaluated.push(EvaluatedPath {
                leaf,
                path,
                score: evaluation.score,
                evaluation: evaluation.evaluation,
            });
        }

        Ok((tree, rank_paths(evaluated)))
    }
}

#[async_trait]
impl Strategy for BranchingSearchStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::BranchingSearch
    }

    async fn run_logged(&self, query: &str) -> Result<RunOutcome, GenerationError> {
        tracing::info!(
            "Branching search starting (branches {}, depth {})",
            self.num_branches,
            self.max_depth
        );
        let generator = self.generator.as_ref();
        let mut log = RunLog::new();

        let (tree, ranked) = self.explore(query, &mut log).await?;
        let best = ranked.into_iter().next().unwrap_or_else(|| {
            let neutral = PathEvaluation::neutral();
            EvaluatedPath {
                leaf: tree.root(),
                path: tree.path(tree.root()),
                score: neutral.score,
                evaluation: neutral.evaluation,
            }
        });
        tracing::info!("Best path scored {:.1}/10", best.score);

        let path_text = prompt::number_steps(&best.path);
        let observation = match catalog_if_any(&self.registry).await {
            Some(catalog) => {
                let decision_prompt = prompt::branching_decide(query, &path_text, &catalog);
                let intent = decide(generator, &decision_prompt, &mut log).await?;
                act(&self.registry, &intent, self.observation_items, &mut log).await
            }
            None => None,
        };

        let answer_prompt = prompt::branching_answer(
            query,
            &path_text,
            best.score,
            &best.evaluation,
            observation.as_deref(),
        );
        let answer = synthesize(generator, &answer_prompt, prompt::BRANCHING_ANSWER, &mut log).await?;

        Ok(RunOutcome { answer, log })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::default_criteria;
    use crate::llm::ScriptedGenerator;
    use crate::tools::testing::RecordingCapability;
    use crate::tools::CapabilityOutcome;

    const BRANCH: &str = "DIFFERENT possible next steps";
    const EVALUATE: &str = "Evaluate this reasoning path";
    const DECIDE: &str = "Decide whether a capability is needed";
    const ANSWER: &str = "provide a comprehensive final answer";

    fn strategy(
        generator: Arc<ScriptedGenerator>,
        registry: CapabilityRegistry,
        branches: usize,
        depth: usize,
        parallelism: usize,
    ) -> BranchingSearchStrategy {
        BranchingSearchStrategy::new(
            generator,
            Arc::new(registry),
            branches,
            depth,
            default_criteria(),
            parallelism,
            5,
        )
    }

    /// One level of three approaches scored 3.0, 9.5 and 7.0.
    fn ranking_script() -> ScriptedGenerator {
        ScriptedGenerator::new()
            .when(BRANCH, r#"["Cut costs", "Grow revenue", "Wait it out"]"#)
            .when(ANSWER, "Grow revenue.")
            .when(&format!("{}\nStep 2: Cut costs", "Step 1: Query: q"), r#"{"score": 3.0, "evaluation": "risky"}"#)
            .when(&format!("{}\nStep 2: Grow revenue", "Step 1: Query: q"), r#"{"score": 9.5, "evaluation": "strong"}"#)
            .when(&format!("{}\nStep 2: Wait it out", "Step 1: Query: q"), r#"{"score": 7.0, "evaluation": "safe"}"#)
    }

    #[test]
    fn tree_paths_and_leaves() {
        let mut tree = ReasoningTree::new("root");
        let a = tree.add_child(tree.root(), "a");
        let b = tree.add_child(tree.root(), "b");
        let a1 = tree.add_child(a, "a1");
        let a2 = tree.add_child(a, "a2");

        assert_eq!(tree.len(), 5);
        assert_eq!(tree.node(a1).depth, 2);
        assert_eq!(tree.path(a2), vec!["root", "a", "a2"]);
        assert_eq!(tree.leaves(), vec![a1, a2, b]);
    }

    #[test]
    fn ranking_is_stable() {
        let path = |leaf: NodeId, score: f64| EvaluatedPath {
            leaf,
            path: vec![],
            score,
            evaluation: String::new(),
        };
        let ranked = rank_paths(vec![path(1, 5.0), path(2, 8.0), path(3, 5.0), path(4, 8.0)]);
        let order: Vec<NodeId> = ranked.iter().map(|p| p.leaf).collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
    }

    #[test]
    fn call_bound() {
        assert_eq!(BranchingSearchStrategy::max_generation_calls(3, 2), 3 + 9 + 9 + 2);
        assert_eq!(BranchingSearchStrategy::max_generation_calls(2, 1), 2 + 2 + 2);
    }

    #[tokio::test]
    async fn highest_scoring_path_wins() {
        let generator = Arc::new(ranking_script());
        let strategy = strategy(generator.clone(), CapabilityRegistry::new(), 3, 1, 1);

        let outcome = strategy.run_logged("q").await.unwrap();

        assert_eq!(outcome.answer, "Grow revenue.");
        let final_prompt = generator.prompts().pop().unwrap();
        assert!(final_prompt.contains("(score: 9.5/10)"));
        assert!(final_prompt.contains("Step 2: Grow revenue"));
        assert!(final_prompt.contains("strong"));
        assert_eq!(outcome.log.count(LogEntryType::Evaluation), 3);
    }

    #[tokio::test]
    async fn exploration_is_deterministic() {
        let first = strategy(Arc::new(ranking_script()), CapabilityRegistry::new(), 3, 1, 1);
        let second = strategy(Arc::new(ranking_script()), CapabilityRegistry::new(), 3, 1, 1);

        let (_, a) = first.explore("q", &mut RunLog::new()).await.unwrap();
        let (_, b) = second.explore("q", &mut RunLog::new()).await.unwrap();
        assert_eq!(a, b);
        let scores: Vec<f64> = a.iter().map(|p| p.score).collect();
        assert_eq!(scores, vec![9.5, 7.0, 3.0]);
    }

    #[tokio::test]
    async fn parallel_matches_sequential() {
        let script = || {
            ScriptedGenerator::new()
                .when(BRANCH, r#"["left", "right"]"#)
                .when("Step 3: left", r#"{"score": 6}"#)
                .when(EVALUATE, r#"{"score": 4, "evaluation": "meh"}"#)
        };
        let sequential = strategy(Arc::new(script()), CapabilityRegistry::new(), 2, 2, 1);
        let parallel = strategy(Arc::new(script()), CapabilityRegistry::new(), 2, 2, 4);

        let (seq_tree, seq_ranked) = sequential.explore("q", &mut RunLog::new()).await.unwrap();
        let (par_tree, par_ranked) = parallel.explore("q", &mut RunLog::new()).await.unwrap();

        assert_eq!(seq_tree.len(), 7);
        assert_eq!(par_tree.len(), 7);
        assert_eq!(seq_ranked, par_ranked);
        assert_eq!(seq_ranked[0].path, vec!["Query: q", "left", "left"]);
    }

    #[tokio::test]
    async fn unparseable_branches_fall_back_to_placeholders() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .when(BRANCH, "")
                .when(EVALUATE, "no idea")
                .when(ANSWER, "best effort"),
        );
        let strategy = strategy(generator.clone(), CapabilityRegistry::new(), 2, 1, 1);

        let (tree, ranked) = strategy.explore("q", &mut RunLog::new()).await.unwrap();
        let contents: Vec<&str> = tree
            .node(tree.root())
            .children
            .iter()
            .map(|&id| tree.node(id).content.as_str())
            .collect();
        assert_eq!(contents, vec!["Approach 1 for the problem", "Approach 2 for the problem"]);
        assert!(ranked.iter().all(|p| p.score == 5.0));
        assert_eq!(ranked[0].evaluation, "Could not evaluate path");
    }

    #[tokio::test]
    async fn acts_on_the_best_path_within_bound() {
        let lookup = RecordingCapability::new("lookup", CapabilityOutcome::success(json!("fresh data")));
        let registry = CapabilityRegistry::new();
        registry.register(lookup.clone()).await;

        let generator = Arc::new(
            ScriptedGenerator::new()
                .when(BRANCH, r#"["one", "two", "three"]"#)
                .when(EVALUATE, r#"{"score": 6, "evaluation": "fine"}"#)
                .when(DECIDE, r#"{"wants_action": true, "capability": "lookup", "arguments": {"query": "x"}}"#)
                .when(ANSWER, "done"),
        );
        let strategy = strategy(generator.clone(), registry, 3, 2, 2);

        let answer = strategy.run("q").await.unwrap();

        assert_eq!(answer, "done");
        assert_eq!(lookup.calls().len(), 1);
        // 1 + 3 build calls, 9 evaluations, decide, answer
        assert_eq!(generator.call_count(), 15);
        assert!(generator.call_count() <= BranchingSearchStrategy::max_generation_calls(3, 2));
        assert!(generator.prompts().pop().unwrap().contains("Additional information gathered:\nfresh data"));
    }

    #[tokio::test]
    async fn generation_faults_propagate() {
        let generator = Arc::new(ScriptedGenerator::failing("down"));
        let strategy = strategy(generator, CapabilityRegistry::new(), 2, 2, 2);
        assert!(strategy.run("q").await.is_err());
    }
}
