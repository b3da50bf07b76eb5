use crate::operation::{Operation, OperationType};

/// How a filter constrains the topic dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TopicFilter {
    /// Every topic under the session, including "no topic".
    #[default]
    Any,
    /// Exactly this topic; `Exact(None)` matches only topic-less operations.
    Exact(Option<String>),
}

/// Selects operations for batch cancellation and queries.
///
/// Unset fields match everything. `session_id` alone matches every topic of
/// that session; adding `topic` narrows it to one exact context.
#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
    pub session_id: Option<String>,
    pub topic: TopicFilter,
    pub message_id: Option<String>,
    pub thread_id: Option<String>,
    pub agent_id: Option<String>,
    pub group_id: Option<String>,
    pub types: Vec<OperationType>,
}

impl OperationFilter {
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Default::default()
        }
    }

    pub fn topic(mut self, topic_id: impl Into<String>) -> Self {
        self.topic = TopicFilter::Exact(Some(topic_id.into()));
        self
    }

    pub fn without_topic(mut self) -> Self {
        self.topic = TopicFilter::Exact(None);
        self
    }

    pub fn message(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn of_type(mut self, op_type: OperationType) -> Self {
        self.types.push(op_type);
        self
    }

    pub fn matches(&self, op: &Operation) -> bool {
        let ctx = &op.context;

        if !self.types.is_empty() && !self.types.contains(&op.op_type) {
            return false;
        }
        if let Some(sid) = &self.session_id {
            if &ctx.session_id != sid {
                return false;
            }
        }
        if let TopicFilter::Exact(topic) = &self.topic {
            let wanted = sw_domain::context::normalize_topic(topic.as_deref());
            if ctx.normalized_topic() != wanted {
                return false;
            }
        }
        if !matches_opt(&self.message_id, &ctx.message_id)
            || !matches_opt(&self.thread_id, &ctx.thread_id)
            || !matches_opt(&self.agent_id, &ctx.agent_id)
            || !matches_opt(&self.group_id, &ctx.group_id)
        {
            return false;
        }
        true
    }
}

fn matches_opt(filter: &Option<String>, value: &Option<String>) -> bool {
    match filter {
        Some(f) => value.as_deref() == Some(f.as_str()),
        None => true,
    }
}
