use serde::{Deserialize, Serialize};

// ── Accounts ──

/// Public author summary embedded in posts, comments and reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub profile_picture_url: String,
}

/// Full account record, visible to its owner and to admins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub profile_picture_url: String,
    pub bio: String,
    pub is_admin: bool,
    pub is_banned: bool,
    pub report_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user: User,
    pub bio: String,
    pub post_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Signup {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Login {
    /// Username or email.
    pub login: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: Account,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateProfile {
    pub bio: Option<String>,
    pub profile_picture_url: Option<String>,
}

// ── Posts ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PostKind {
    Poll,
    Quiz,
}

impl PostKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PostKind::Poll => "poll",
            PostKind::Quiz => "quiz",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "poll" => Some(PostKind::Poll),
            "quiz" => Some(PostKind::Quiz),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostOption {
    pub id: i64,
    pub text: String,
    pub vote_count: i64,
    /// Quiz answer key; only present once revealed to the viewer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostView {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: PostKind,
    pub owner: User,
    pub question: String,
    pub options: Vec<PostOption>,
    pub total_votes: i64,
    pub comment_count: i64,
    pub comments: Vec<Comment>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewOption {
    pub text: String,
    #[serde(default)]
    pub correct: bool,
    #[serde(default)]
    pub explanation: Option<String>,
}

impl NewOption {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            correct: false,
            explanation: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePost {
    #[serde(rename = "type")]
    pub kind: PostKind,
    pub question: String,
    pub options: Vec<NewOption>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePost {
    pub question: Option<String>,
    /// Replaces every option; refused once the post has votes.
    pub options: Option<Vec<NewOption>>,
}

// ── Votes ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CastVote {
    pub post_id: i64,
    pub option_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteOutcome {
    Created,
    Changed,
    Retracted,
    Answered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionTally {
    pub option_id: i64,
    pub vote_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub outcome: VoteOutcome,
    pub post_id: i64,
    /// The voter's option after reconciliation; `None` once retracted.
    pub user_vote: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub tallies: Vec<OptionTally>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteStatus {
    pub post_id: i64,
    pub user_vote: Option<i64>,
    pub tallies: Vec<OptionTally>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MyVote {
    pub id: i64,
    pub post_id: i64,
    #[serde(rename = "type")]
    pub kind: PostKind,
    pub question: String,
    pub option_id: i64,
    pub option_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    pub created_at: String,
}

// ── Comments ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub user: User,
    pub content: String,
    pub parent_comment_id: Option<i64>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateComment {
    pub post_id: i64,
    pub content: String,
    #[serde(default)]
    pub parent_comment_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EditComment {
    pub content: String,
}

// ── Moderation ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    /// `None` once the account behind it has been deleted.
    pub reporter: Option<User>,
    pub reported_user: Option<User>,
    pub reason: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateReport {
    pub reported_user_id: i64,
    pub reason: String,
}

// ── Errors ──

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
    pub status_code: u16,
}
