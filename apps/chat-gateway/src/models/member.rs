/// A room member as seen by the push path: who they are and where to reach them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user_id: String,
    pub username: String,
    pub push_token: Option<String>,
}
