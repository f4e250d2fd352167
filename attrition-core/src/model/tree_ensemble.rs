//! Ансамбль деревьев градиентного бустинга (XGBoost-совместимая семантика).
//!
//! Модель хранится в JSON: базовая вероятность и список деревьев, у каждого узла
//! есть `cover` (сумма гессианов обучающих примеров, прошедших через узел).
//! Колонки узлов задаются по имени и связываются с шаблоном фич при загрузке.
//!
//! Объяснения считаются точным path-dependent TreeSHAP в пространстве log-odds,
//! так что `base_value + Σ values` равно margin модели.

use crate::model::classifier::{ensure_width, logit, sigmoid, AttritionClassifier};
use crate::model::explain::{Explainer, Explanation};
use crate::model::features::{FeatureTemplate, FeatureVector};
use anyhow::{bail, ensure, Context, Result};
use serde::Deserialize;

/// JSON-описание ансамбля.
#[derive(Debug, Clone, Deserialize)]
pub struct TreeEnsembleDocument {
    /// Базовая вероятность (как `base_score` в XGBoost для `binary:logistic`).
    #[serde(default = "default_base_score")]
    pub base_score: f64,
    #[serde(default)]
    pub objective: Option<String>,
    pub trees: Vec<TreeDocument>,
}

fn default_base_score() -> f64 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct TreeDocument {
    pub nodes: Vec<NodeDocument>,
}

/// Узел дерева: либо разбиение (`feature`, `threshold`, `yes`, `no`), либо лист (`leaf`).
#[derive(Debug, Clone, Deserialize)]
pub struct NodeDocument {
    pub id: usize,
    #[serde(default)]
    pub feature: Option<String>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub yes: Option<usize>,
    #[serde(default)]
    pub no: Option<usize>,
    /// Куда идти при отсутствующем значении (по умолчанию `yes`).
    #[serde(default)]
    pub missing: Option<usize>,
    #[serde(default)]
    pub leaf: Option<f64>,
    pub cover: f64,
}

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        yes: usize,
        no: usize,
        missing: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
    covers: Vec<f64>,
}

impl Tree {
    /// Собрать дерево из JSON-узлов.
    ///
    /// Идентификаторы узлов должны покрывать `0..n`, корень — узел 0, а потомки
    /// имеют больший идентификатор, чем родитель (так нумерует узлы XGBoost).
    fn compile(tree_no: usize, document: TreeDocument, template: &FeatureTemplate) -> Result<Self> {
        let count = document.nodes.len();
        ensure!(count > 0, "tree {tree_no} has no nodes");

        let mut slots: Vec<Option<(Node, f64)>> = vec![None; count];
        for node in document.nodes {
            let id = node.id;
            ensure!(id < count, "tree {tree_no}: node id {id} is out of range 0..{count}");
            ensure!(slots[id].is_none(), "tree {tree_no}: duplicate node id {id}");
            ensure!(
                node.cover.is_finite() && node.cover > 0.0,
                "tree {tree_no}: node {id} has invalid cover {}",
                node.cover
            );

            let compiled = match (node.leaf, node.feature) {
                (Some(value), None) => Node::Leaf { value },
                (None, Some(name)) => {
                    let feature = template.column_index(&name).with_context(|| {
                        format!("tree {tree_no}: node {id} splits on `{name}`, which is not a training column")
                    })?;
                    let threshold = node
                        .threshold
                        .with_context(|| format!("tree {tree_no}: node {id} has no threshold"))?;
                    let yes = node
                        .yes
                        .with_context(|| format!("tree {tree_no}: node {id} has no `yes` child"))?;
                    let no = node
                        .no
                        .with_context(|| format!("tree {tree_no}: node {id} has no `no` child"))?;
                    let missing = node.missing.unwrap_or(yes);
                    for child in [yes, no] {
                        ensure!(
                            child > id && child < count,
                            "tree {tree_no}: node {id} points to invalid child {child}"
                        );
                    }
                    ensure!(yes != no, "tree {tree_no}: node {id} has identical children");
                    ensure!(
                        missing == yes || missing == no,
                        "tree {tree_no}: node {id} sends missing values to {missing}, which is not a child"
                    );
                    Node::Split {
                        feature,
                        threshold,
                        yes,
                        no,
                        missing,
                    }
                }
                _ => bail!("tree {tree_no}: node {id} must be either a leaf or a split"),
            };
            slots[id] = Some((compiled, node.cover));
        }

        let mut nodes = Vec::with_capacity(count);
        let mut covers = Vec::with_capacity(count);
        for (id, slot) in slots.into_iter().enumerate() {
            let (node, cover) = slot.with_context(|| format!("tree {tree_no}: node {id} is missing"))?;
            nodes.push(node);
            covers.push(cover);
        }

        Ok(Self { nodes, covers })
    }

    fn next(&self, node: &Node, x: &[f64]) -> Option<usize> {
        match node {
            Node::Leaf { .. } => None,
            Node::Split {
                feature,
                threshold,
                yes,
                no,
                missing,
            } => {
                let value = x[*feature];
                Some(if value.is_nan() {
                    *missing
                } else if value < *threshold {
                    *yes
                } else {
                    *no
                })
            }
        }
    }

    fn predict(&self, x: &[f64]) -> f64 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { value } => return *value,
                node => match self.next(node, x) {
                    Some(next) => id = next,
                    None => unreachable!("split node always has a successor"),
                },
            }
        }
    }

    /// Вес узла для долей пути: сумма cover потомков.
    fn split_weight(&self, yes: usize, no: usize) -> f64 {
        self.covers[yes] + self.covers[no]
    }

    /// Ожидаемое значение поддерева, взвешенное по cover.
    fn expected_value(&self, id: usize) -> f64 {
        match &self.nodes[id] {
            Node::Leaf { value } => *value,
            Node::Split { yes, no, .. } => {
                let weight = self.split_weight(*yes, *no);
                (self.covers[*yes] * self.expected_value(*yes)
                    + self.covers[*no] * self.expected_value(*no))
                    / weight
            }
        }
    }

    fn shap(&self, x: &[f64], phi: &mut [f64]) {
        self.shap_recurse(x, phi, 0, Vec::new(), 1.0, 1.0, None);
    }

    #[allow(clippy::too_many_arguments)]
    fn shap_recurse(
        &self,
        x: &[f64],
        phi: &mut [f64],
        id: usize,
        mut path: Vec<PathElement>,
        zero_fraction: f64,
        one_fraction: f64,
        feature: Option<usize>,
    ) {
        extend_path(&mut path, zero_fraction, one_fraction, feature);

        let node = &self.nodes[id];
        match node {
            Node::Leaf { value } => {
                for i in 1..path.len() {
                    let weight = unwound_path_sum(&path, i);
                    let element = &path[i];
                    if let Some(f) = element.feature {
                        phi[f] += weight * (element.one_fraction - element.zero_fraction) * value;
                    }
                }
            }
            Node::Split {
                feature: split,
                yes,
                no,
                ..
            } => {
                let hot = match self.next(node, x) {
                    Some(next) => next,
                    None => return,
                };
                let cold = if hot == *yes { *no } else { *yes };
                let weight = self.split_weight(*yes, *no);
                let hot_zero_fraction = self.covers[hot] / weight;
                let cold_zero_fraction = self.covers[cold] / weight;

                // Если по этой фиче уже было разбиение выше, убираем его из пути
                let mut incoming_zero_fraction = 1.0;
                let mut incoming_one_fraction = 1.0;
                if let Some(index) = path.iter().position(|e| e.feature == Some(*split)) {
                    incoming_zero_fraction = path[index].zero_fraction;
                    incoming_one_fraction = path[index].one_fraction;
                    unwind_path(&mut path, index);
                }

                self.shap_recurse(
                    x,
                    phi,
                    hot,
                    path.clone(),
                    hot_zero_fraction * incoming_zero_fraction,
                    incoming_one_fraction,
                    Some(*split),
                );
                self.shap_recurse(
                    x,
                    phi,
                    cold,
                    path,
                    cold_zero_fraction * incoming_zero_fraction,
                    0.0,
                    Some(*split),
                );
            }
        }
    }
}

/// Элемент уникального пути TreeSHAP.
#[derive(Debug, Clone, Copy)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    pweight: f64,
}

fn extend_path(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: Option<usize>) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        pweight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let scale = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].pweight += one_fraction * path[i].pweight * (i + 1) as f64 / scale;
        path[i].pweight = zero_fraction * path[i].pweight * (depth - i) as f64 / scale;
    }
}

fn unwind_path(path: &mut Vec<PathElement>, index: usize) {
    let depth = path.len() - 1;
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let scale = (depth + 1) as f64;
    let mut next_one_portion = path[depth].pweight;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next_one_portion * scale / ((i + 1) as f64 * one_fraction);
            next_one_portion = tmp - path[i].pweight * zero_fraction * (depth - i) as f64 / scale;
        } else {
            path[i].pweight = path[i].pweight * scale / (zero_fraction * (depth - i) as f64);
        }
    }

    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

fn unwound_path_sum(path: &[PathElement], index: usize) -> f64 {
    let depth = path.len() - 1;
    let one_fraction = path[index].one_fraction;
    let zero_fraction = path[index].zero_fraction;
    let scale = (depth + 1) as f64;
    let mut next_one_portion = path[depth].pweight;
    let mut total = 0.0;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = next_one_portion * scale / ((i + 1) as f64 * one_fraction);
            total += tmp;
            next_one_portion = path[i].pweight - tmp * zero_fraction * (depth - i) as f64 / scale;
        } else if zero_fraction != 0.0 {
            total += path[i].pweight / zero_fraction / ((depth - i) as f64 / scale);
        }
    }
    total
}

/// Классификатор на основе ансамбля деревьев.
#[derive(Debug, Clone)]
pub struct TreeEnsembleClassifier {
    trees: Vec<Tree>,
    base_margin: f64,
    expected_margin: f64,
    feature_names: Vec<String>,
}

impl TreeEnsembleClassifier {
    /// Собрать модель из JSON-документа, связав колонки узлов с шаблоном.
    pub fn from_document(document: TreeEnsembleDocument, template: &FeatureTemplate) -> Result<Self> {
        if let Some(objective) = &document.objective {
            ensure!(
                objective == "binary:logistic",
                "unsupported objective `{objective}` (only binary:logistic is supported)"
            );
        }
        ensure!(
            document.base_score > 0.0 && document.base_score < 1.0,
            "base_score must be a probability in (0, 1) (got {})",
            document.base_score
        );
        ensure!(!document.trees.is_empty(), "tree ensemble has no trees");

        let trees = document
            .trees
            .into_iter()
            .enumerate()
            .map(|(tree_no, tree)| Tree::compile(tree_no, tree, template))
            .collect::<Result<Vec<_>>>()?;

        let base_margin = logit(document.base_score);
        let expected_margin = base_margin + trees.iter().map(|t| t.expected_value(0)).sum::<f64>();

        Ok(Self {
            trees,
            base_margin,
            expected_margin,
            feature_names: template.columns().to_vec(),
        })
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    /// Ответ модели в log-odds.
    pub fn margin(&self, x: &[f64]) -> f64 {
        self.base_margin + self.trees.iter().map(|t| t.predict(x)).sum::<f64>()
    }

    /// Ожидаемый margin на обучающем распределении (по cover).
    pub fn expected_margin(&self) -> f64 {
        self.expected_margin
    }

    /// SHAP-значения для вектора фич (в log-odds).
    pub fn shap_values(&self, x: &[f64]) -> Vec<f64> {
        let mut phi = vec![0.0; x.len()];
        for tree in &self.trees {
            tree.shap(x, &mut phi);
        }
        phi
    }
}

impl AttritionClassifier for TreeEnsembleClassifier {
    fn predict_proba(&self, features: &FeatureVector) -> Result<f64> {
        ensure_width(features, self.feature_names.len())?;
        Ok(sigmoid(self.margin(features.values())).clamp(0.0, 1.0))
    }

    fn kind(&self) -> &'static str {
        "tree_ensemble"
    }
}

impl Explainer for TreeEnsembleClassifier {
    fn explain(&self, features: &FeatureVector) -> Result<Explanation> {
        ensure_width(features, self.feature_names.len())?;
        let x = features.values();
        Ok(Explanation {
            base_value: self.expected_margin,
            output_value: self.margin(x),
            values: self.shap_values(x),
            data: x.to_vec(),
            feature_names: self.feature_names.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn template() -> FeatureTemplate {
        FeatureTemplate::new(
            vec![
                "OverTime".to_string(),
                "MonthlyIncome".to_string(),
                "Age".to_string(),
            ],
            &HashMap::new(),
        )
        .unwrap()
    }

    fn document(json: &str) -> TreeEnsembleDocument {
        serde_json::from_str(json).unwrap()
    }

    /// Два дерева: второе дважды разбивает по MonthlyIncome, чтобы задействовать unwind.
    fn ensemble() -> TreeEnsembleClassifier {
        let doc = document(
            r#"{
                "base_score": 0.3,
                "objective": "binary:logistic",
                "trees": [
                    {"nodes": [
                        {"id": 0, "feature": "OverTime", "threshold": 0.5, "yes": 1, "no": 2, "cover": 100},
                        {"id": 1, "feature": "Age", "threshold": 30, "yes": 3, "no": 4, "cover": 70},
                        {"id": 2, "leaf": 0.8, "cover": 30},
                        {"id": 3, "leaf": 0.1, "cover": 20},
                        {"id": 4, "leaf": -0.5, "cover": 50}
                    ]},
                    {"nodes": [
                        {"id": 0, "feature": "MonthlyIncome", "threshold": 5000, "yes": 1, "no": 2, "missing": 2, "cover": 100},
                        {"id": 1, "feature": "MonthlyIncome", "threshold": 2500, "yes": 3, "no": 4, "cover": 40},
                        {"id": 2, "feature": "OverTime", "threshold": 0.5, "yes": 5, "no": 6, "cover": 60},
                        {"id": 3, "leaf": 0.6, "cover": 15},
                        {"id": 4, "leaf": 0.2, "cover": 25},
                        {"id": 5, "leaf": -0.3, "cover": 45},
                        {"id": 6, "leaf": 0.1, "cover": 15}
                    ]}
                ]
            }"#,
        );
        TreeEnsembleClassifier::from_document(doc, &template()).unwrap()
    }

    #[test]
    fn test_single_split_shap_matches_hand_computation() {
        let doc = document(
            r#"{"trees": [{"nodes": [
                {"id": 0, "feature": "OverTime", "threshold": 0.5, "yes": 1, "no": 2, "cover": 100},
                {"id": 1, "leaf": -1.0, "cover": 60},
                {"id": 2, "leaf": 1.0, "cover": 40}
            ]}]}"#,
        );
        let model = TreeEnsembleClassifier::from_document(doc, &template()).unwrap();

        // E = 0.6 * -1 + 0.4 * 1 = -0.2 (base_score 0.5 → base margin 0)
        assert!((model.expected_margin() - -0.2).abs() < 1e-12);
        let phi = model.shap_values(&[0.0, 3000.0, 30.0]);
        assert!((phi[0] - -0.8).abs() < 1e-12);
        assert_eq!(phi[1], 0.0);
        assert_eq!(phi[2], 0.0);
    }

    #[test]
    fn test_margin_follows_xgboost_split_rule() {
        let model = ensemble();
        let base = logit(0.3);
        // OverTime=1 → лист 0.8; доход 3000 < 5000, ≥ 2500 → 0.2
        let margin = model.margin(&[1.0, 3000.0, 40.0]);
        assert!((margin - (base + 0.8 + 0.2)).abs() < 1e-12);
        // OverTime=0, Age=25 → 0.1; доход 8000 → узел 2 → OverTime < 0.5 → -0.3
        let margin = model.margin(&[0.0, 8000.0, 25.0]);
        assert!((margin - (base + 0.1 - 0.3)).abs() < 1e-12);
    }

    #[test]
    fn test_missing_value_uses_missing_branch() {
        let model = ensemble();
        let base = logit(0.3);
        let margin = model.margin(&[1.0, f64::NAN, 40.0]);
        // Отсутствующий доход → узел 2 → OverTime=1 → 0.1
        assert!((margin - (base + 0.8 + 0.1)).abs() < 1e-12);
    }

    #[test]
    fn test_shap_local_accuracy() {
        let model = ensemble();
        for x in [
            [1.0, 3000.0, 40.0],
            [0.0, 8000.0, 25.0],
            [0.0, 2000.0, 45.0],
            [1.0, 9000.0, 22.0],
        ] {
            let phi = model.shap_values(&x);
            let reconstructed = model.expected_margin() + phi.iter().sum::<f64>();
            assert!(
                (reconstructed - model.margin(&x)).abs() < 1e-9,
                "local accuracy violated for {x:?}: {reconstructed} vs {}",
                model.margin(&x)
            );
        }
    }

    #[test]
    fn test_shap_is_zero_for_unused_feature() {
        let doc = document(
            r#"{"trees": [{"nodes": [
                {"id": 0, "feature": "OverTime", "threshold": 0.5, "yes": 1, "no": 2, "cover": 10},
                {"id": 1, "leaf": -0.4, "cover": 5},
                {"id": 2, "leaf": 0.4, "cover": 5}
            ]}]}"#,
        );
        let model = TreeEnsembleClassifier::from_document(doc, &template()).unwrap();
        let phi = model.shap_values(&[1.0, 40000.0, 59.0]);
        assert!((phi[0] - 0.4).abs() < 1e-12);
        assert_eq!(&phi[1..], &[0.0, 0.0]);
    }

    #[test]
    fn test_predict_proba_and_explain() {
        let model = ensemble();
        let template = template();
        let mut vector = template.base_vector();
        vector.set("OverTime", 1.0);
        vector.set("MonthlyIncome", 3000.0);
        vector.set("Age", 40.0);

        let p = model.predict_proba(&vector).unwrap();
        assert!((p - sigmoid(model.margin(vector.values()))).abs() < 1e-12);

        let explanation = model.explain(&vector).unwrap();
        assert_eq!(explanation.feature_names, template.columns());
        assert!((explanation.reconstructed_output() - explanation.output_value).abs() < 1e-9);
        assert_eq!(model.kind(), "tree_ensemble");
        assert_eq!(model.tree_count(), 2);
    }

    #[test]
    fn test_rejects_unknown_column() {
        let doc = document(
            r#"{"trees": [{"nodes": [
                {"id": 0, "feature": "Salary", "threshold": 1, "yes": 1, "no": 2, "cover": 2},
                {"id": 1, "leaf": 0, "cover": 1},
                {"id": 2, "leaf": 0, "cover": 1}
            ]}]}"#,
        );
        let err = TreeEnsembleClassifier::from_document(doc, &template()).unwrap_err();
        assert!(err.to_string().contains("Salary"));
    }

    #[test]
    fn test_rejects_malformed_trees() {
        // Потомок с меньшим id (возможный цикл)
        let cyclic = document(
            r#"{"trees": [{"nodes": [
                {"id": 0, "leaf": 0, "cover": 1},
                {"id": 1, "feature": "Age", "threshold": 1, "yes": 0, "no": 2, "cover": 2},
                {"id": 2, "leaf": 0, "cover": 1}
            ]}]}"#,
        );
        assert!(TreeEnsembleClassifier::from_document(cyclic, &template()).is_err());

        let unsupported = document(
            r#"{"objective": "reg:squarederror", "trees": [{"nodes": [{"id": 0, "leaf": 0, "cover": 1}]}]}"#,
        );
        assert!(TreeEnsembleClassifier::from_document(unsupported, &template()).is_err());

        let no_trees = document(r#"{"trees": []}"#);
        assert!(TreeEnsembleClassifier::from_document(no_trees, &template()).is_err());
    }

    #[test]
    fn test_rejects_non_positive_cover() {
        for cover in ["0", "-1"] {
            let doc = document(&format!(
                r#"{{"trees": [{{"nodes": [
                    {{"id": 0, "feature": "Age", "threshold": 30, "yes": 1, "no": 2, "cover": 10}},
                    {{"id": 1, "leaf": 0.2, "cover": 10}},
                    {{"id": 2, "leaf": -0.2, "cover": {cover}}}
                ]}}]}}"#
            ));
            let err = TreeEnsembleClassifier::from_document(doc, &template()).unwrap_err();
            assert!(err.to_string().contains("invalid cover"), "{err}");
        }
    }

    #[test]
    fn test_predict_proba_rejects_wrong_width() {
        let model = ensemble();
        let narrow = FeatureTemplate::new(vec!["OverTime".into()], &HashMap::new()).unwrap();
        assert!(model.predict_proba(&narrow.base_vector()).is_err());
    }
}
