//! Test data generation for benchmarks.
//!
//! Generators are seeded so every run loads the same graph.

use joinery_core::catalog::{EntityDef, FieldDef, Registry, RelationDef, ScalarType};
use joinery_core::Error;
use joinery_proto::{ResultRow, Value};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Scale factor for benchmark data generation.
#[derive(Clone, Copy, Debug, Default)]
pub enum Scale {
    /// 10 users; quick iteration.
    Tiny,
    /// 100 users.
    #[default]
    Small,
    /// 1,000 users.
    Medium,
}

impl Scale {
    /// Number of users.
    pub fn users(&self) -> usize {
        match self {
            Scale::Tiny => 10,
            Scale::Small => 100,
            Scale::Medium => 1_000,
        }
    }

    /// Posts per user.
    pub fn posts_per_user(&self) -> usize {
        match self {
            Scale::Tiny => 2,
            Scale::Small => 5,
            Scale::Medium => 5,
        }
    }

    /// Comments per post.
    pub fn comments_per_post(&self) -> usize {
        match self {
            Scale::Tiny => 1,
            Scale::Small => 3,
            Scale::Medium => 2,
        }
    }
}

/// Blog schema: users write posts, posts have comments, every user belongs
/// to one of a few teams.
pub fn blog_registry() -> Result<Registry, Error> {
    Registry::builder()
        .entity(
            EntityDef::new("Team")
                .with_field(FieldDef::primary_key("id", ScalarType::Int64))
                .with_field(FieldDef::new("name", ScalarType::String)),
        )
        .entity(
            EntityDef::new("User")
                .with_field(FieldDef::primary_key("id", ScalarType::Int64))
                .with_field(FieldDef::new("name", ScalarType::String))
                .with_field(FieldDef::new("email", ScalarType::String))
                .with_field(FieldDef::new("age", ScalarType::Int32))
                .with_relation(RelationDef::foreign_key("team", "Team").required()),
        )
        .entity(
            EntityDef::new("Post")
                .with_field(FieldDef::primary_key("id", ScalarType::Int64))
                .with_field(FieldDef::new("title", ScalarType::String))
                .with_field(FieldDef::new("views", ScalarType::Int64))
                .with_relation(
                    RelationDef::foreign_key("author", "User")
                        .required()
                        .with_related_name("posts"),
                ),
        )
        .entity(
            EntityDef::new("Comment")
                .with_field(FieldDef::primary_key("id", ScalarType::Int64))
                .with_field(FieldDef::new("text", ScalarType::String))
                .with_relation(
                    RelationDef::foreign_key("post", "Post")
                        .required()
                        .with_related_name("comments"),
                ),
        )
        .build()
}

/// Number of teams users are spread over.
pub const TEAMS: usize = 8;

/// Rows of every table, keyed by table name.
pub struct BlogData {
    pub tables: Vec<(&'static str, Vec<ResultRow>)>,
}

impl BlogData {
    /// Total number of rows.
    pub fn len(&self) -> usize {
        self.tables.iter().map(|(_, rows)| rows.len()).sum()
    }

    /// Whether no rows were generated.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Generate a random string of specified length.
fn random_string(rng: &mut StdRng, len: usize) -> String {
    (0..len).map(|_| rng.sample(Alphanumeric) as char).collect()
}

/// Generate the blog graph for a scale, with explicit integer keys.
pub fn generate(scale: Scale) -> BlogData {
    const SEED: u64 = 12345;
    let mut rng = StdRng::seed_from_u64(SEED);
    let names = ["Alice", "Bob", "Charlie", "David", "Eve", "Frank", "Grace", "Henry"];

    let teams: Vec<ResultRow> = (0..TEAMS)
        .map(|i| {
            ResultRow::new()
                .with("id", (i + 1) as i64)
                .with("name", format!("team-{}", i))
        })
        .collect();

    let mut users = Vec::with_capacity(scale.users());
    let mut posts = Vec::new();
    let mut comments = Vec::new();
    for u in 0..scale.users() {
        let user_id = (u + 1) as i64;
        users.push(
            ResultRow::new()
                .with("id", user_id)
                .with("name", format!("{}_{}", names[u % names.len()], u))
                .with("email", format!("user{}@example{}.com", u, u % 10))
                .with("age", Value::Int32(18 + (rng.gen::<u32>() % 60) as i32))
                .with("team_id", (u % TEAMS + 1) as i64),
        );

        for p in 0..scale.posts_per_user() {
            let post_id = (posts.len() + 1) as i64;
            posts.push(
                ResultRow::new()
                    .with("id", post_id)
                    .with("title", format!("Post {}: {}", p, random_string(&mut rng, 20)))
                    .with("views", rng.gen_range(0..1_000_000i64))
                    .with("author_id", user_id),
            );

            for _ in 0..scale.comments_per_post() {
                comments.push(
                    ResultRow::new()
                        .with("id", (comments.len() + 1) as i64)
                        .with("text", random_string(&mut rng, 60))
                        .with("post_id", post_id),
                );
            }
        }
    }

    BlogData {
        tables: vec![
            ("teams", teams),
            ("users", users),
            ("posts", posts),
            ("comments", comments),
        ],
    }
}
