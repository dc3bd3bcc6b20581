//! 用户目录解析（歧义子协议）
//!
//! 人名 → 规范身份的唯一入口：先做显示名子串匹配，零命中时退回全目录
//! 近似匹配（相似度排序、单一最佳候选、阈值 0.8）。多个命中时产出完整
//! 候选列表，调用方必须停下向用户澄清，而不是猜测。所有处理器与格式化
//! 器的 ClarificationRequired 模板消费同一种三态结果。

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::AgentError;

/// 外部目录中的规范身份（核心视角只读）
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub canonical_id: String,
    pub display_name: String,
    /// 消息网关可投递的联系地址（电话号码）
    pub contact_address: String,
}

/// 单次解析调用的终态结果（解析器内部不重试）
#[derive(Debug, Clone, PartialEq)]
pub enum AmbiguityResult {
    Resolved(Identity),
    /// 多个子串命中：完整候选名列表
    AmbiguousMatch(Vec<String>),
    /// 近似匹配超过阈值：单一建议名
    SuggestedCorrection(String),
    NotFound,
}

/// 目录存储能力面：按名模糊查询、按规范 id 精确查询与全名清单
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn find_by_name_like(&self, pattern: &str) -> Result<Vec<Identity>, AgentError>;

    async fn find_by_id(&self, canonical_id: &str) -> Result<Option<Identity>, AgentError>;

    async fn all_names(&self) -> Result<Vec<String>, AgentError>;
}

/// 目录解析器；cutoff 为近似匹配阈值（默认 0.8）
pub struct DirectoryResolver {
    store: Arc<dyn DirectoryStore>,
    cutoff: f64,
}

impl DirectoryResolver {
    pub fn new(store: Arc<dyn DirectoryStore>) -> Self {
        Self { store, cutoff: 0.8 }
    }

    pub fn with_cutoff(mut self, cutoff: f64) -> Self {
        self.cutoff = cutoff;
        self
    }

    /// 规范 id → 身份（调用方自己的身份查询走这里）
    pub async fn identity(&self, canonical_id: &str) -> Result<Option<Identity>, AgentError> {
        self.store.find_by_id(canonical_id).await
    }

    /// 人名解析；仅传输错误上抛，其余情况都落在三态结果里
    pub async fn resolve(&self, name: &str) -> Result<AmbiguityResult, AgentError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(AmbiguityResult::NotFound);
        }

        let mut matches = self.store.find_by_name_like(name).await?;
        match matches.len() {
            1 => Ok(AmbiguityResult::Resolved(matches.remove(0))),
            0 => self.suggest(name).await,
            _ => Ok(AmbiguityResult::AmbiguousMatch(
                matches.into_iter().map(|m| m.display_name).collect(),
            )),
        }
    }

    /// 近似匹配回退：全目录相似度排序，单一最佳候选
    async fn suggest(&self, name: &str) -> Result<AmbiguityResult, AgentError> {
        let all = self.store.all_names().await?;
        let best = all
            .into_iter()
            .map(|candidate| (similarity(name, &candidate), candidate))
            .filter(|(score, _)| *score >= self.cutoff)
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        Ok(match best {
            Some((_, candidate)) => AmbiguityResult::SuggestedCorrection(candidate),
            None => AmbiguityResult::NotFound,
        })
    }
}

/// 序列相似度：2*LCS / (len_a + len_b)，大小写不敏感
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    // 标准 LCS 动态规划，滚动一行
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for &ca in &a {
        for (j, &cb) in b.iter().enumerate() {
            cur[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(cur[j])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    2.0 * prev[b.len()] as f64 / (a.len() + b.len()) as f64
}
