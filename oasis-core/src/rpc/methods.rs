//! Remote methods exposed by the log store

use std::fmt;

/// Dotted path of a remote method, e.g. `about.socialValue`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Method(&'static str);

impl Method {
    pub const fn new(path: &'static str) -> Self {
        Method(path)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

pub const WHOAMI: Method = Method::new("whoami");
pub const GET: Method = Method::new("get");
pub const PUBLISH: Method = Method::new("publish");
pub const STATUS: Method = Method::new("status");

pub const CREATE_LOG_STREAM: Method = Method::new("createLogStream");
pub const CREATE_USER_STREAM: Method = Method::new("createUserStream");
pub const QUERY_READ: Method = Method::new("query.read");
pub const SEARCH_QUERY: Method = Method::new("search.query");

pub const ABOUT_SOCIAL_VALUE: Method = Method::new("about.socialValue");
pub const NAMES_GET_SIGNIFIER: Method = Method::new("names.getSignifier");
pub const NAMES_GET_IMAGE_FOR: Method = Method::new("names.getImageFor");
pub const FRIENDS_IS_FOLLOWING: Method = Method::new("friends.isFollowing");
pub const FRIENDS_IS_BLOCKING: Method = Method::new("friends.isBlocking");

pub const CONN_PEERS: Method = Method::new("conn.peers");
pub const BLOBS_GET: Method = Method::new("blobs.get");
pub const BLOBS_WANT: Method = Method::new("blobs.want");
