//! Question content delivery: a level-specific set with a default fallback.

use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    dao::models::QuestionEntity,
    state::quiz::{QuestionError, QuestionSet},
};

const DEFAULT_FILE: &str = "questions.json";

/// Failures while loading question content.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("no question content at `{path}`")]
    Missing { path: String },
    #[error("failed to read question content `{path}`")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse question content `{path}`")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid question content `{path}`")]
    Invalid {
        path: String,
        #[source]
        source: QuestionError,
    },
    #[error("question content `{path}` is empty")]
    Empty { path: String },
}

/// Source of question sets keyed by level.
pub trait ContentLoader: Send + Sync {
    /// Load the ordered questions for `level`, falling back to the default set.
    fn load_questions(&self, level: u32) -> BoxFuture<'static, Result<Arc<QuestionSet>, ContentError>>;
}

/// Loads `questions-level-{n}.json` from a directory, falling back to `questions.json`.
#[derive(Clone)]
pub struct FileContentLoader {
    directory: Arc<Path>,
    cache: Arc<DashMap<u32, Arc<QuestionSet>>>,
}

impl FileContentLoader {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: Arc::from(directory.into()),
            cache: Arc::new(DashMap::new()),
        }
    }

    fn level_path(&self, level: u32) -> PathBuf {
        self.directory.join(format!("questions-level-{level}.json"))
    }

    fn default_path(&self) -> PathBuf {
        self.directory.join(DEFAULT_FILE)
    }

    async fn read_set(path: &Path, level: u32) -> Result<QuestionSet, ContentError> {
        let display = path.display().to_string();
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ContentError::Missing { path: display });
            }
            Err(source) => {
                return Err(ContentError::Read {
                    path: display,
                    source,
                });
            }
        };

        let entities: Vec<QuestionEntity> =
            serde_json::from_str(&contents).map_err(|source| ContentError::Parse {
                path: display.clone(),
                source,
            })?;
        into_question_set(display, level, entities)
    }
}

impl ContentLoader for FileContentLoader {
    fn load_questions(&self, level: u32) -> BoxFuture<'static, Result<Arc<QuestionSet>, ContentError>> {
        let loader = self.clone();
        Box::pin(async move {
            if let Some(cached) = loader.cache.get(&level) {
                return Ok(cached.clone());
            }

            let set = match Self::read_set(&loader.level_path(level), level).await {
                Ok(set) => set,
                Err(ContentError::Missing { .. }) => {
                    Self::read_set(&loader.default_path(), level).await?
                }
                Err(err) => {
                    warn!(level, error = %err, "level content unusable; falling back to default set");
                    Self::read_set(&loader.default_path(), level).await?
                }
            };

            info!(level, questions = set.len(), "loaded question content");
            let set = Arc::new(set);
            loader.cache.insert(level, set.clone());
            Ok(set)
        })
    }
}

/// In-memory content, used for embedding fixed sets and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticContentLoader {
    levels: HashMap<u32, Vec<QuestionEntity>>,
    default: Option<Vec<QuestionEntity>>,
}

impl StaticContentLoader {
    /// Loader serving `questions` for every level.
    pub fn with_default(questions: Vec<QuestionEntity>) -> Self {
        Self {
            levels: HashMap::new(),
            default: Some(questions),
        }
    }

    /// Loader with no content at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Register a dedicated set for `level`.
    pub fn with_level(mut self, level: u32, questions: Vec<QuestionEntity>) -> Self {
        self.levels.insert(level, questions);
        self
    }
}

impl ContentLoader for StaticContentLoader {
    fn load_questions(&self, level: u32) -> BoxFuture<'static, Result<Arc<QuestionSet>, ContentError>> {
        let entities = self
            .levels
            .get(&level)
            .map(|questions| (format!("level {level}"), questions.clone()))
            .or_else(|| {
                self.default
                    .as_ref()
                    .map(|questions| ("default".to_string(), questions.clone()))
            });

        Box::pin(async move {
            let (source, entities) = entities.ok_or_else(|| ContentError::Missing {
                path: format!("level {level}"),
            })?;
            into_question_set(source, level, entities).map(Arc::new)
        })
    }
}

fn into_question_set(
    path: String,
    level: u32,
    entities: Vec<QuestionEntity>,
) -> Result<QuestionSet, ContentError> {
    if entities.is_empty() {
        return Err(ContentError::Empty { path });
    }
    QuestionSet::from_entities(level, entities)
        .map_err(|source| ContentError::Invalid { path, source })
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn question(text: &str) -> QuestionEntity {
        QuestionEntity {
            question: text.into(),
            options: vec!["yes".into(), "no".into()],
            answer: "yes".into(),
        }
    }

    fn scratch_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("quiz-room-{label}-{nanos}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_set(dir: &Path, name: &str, questions: &[QuestionEntity]) {
        std::fs::write(dir.join(name), serde_json::to_string(questions).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn level_file_wins_over_default() {
        let dir = scratch_dir("level");
        write_set(&dir, "questions.json", &[question("default")]);
        write_set(&dir, "questions-level-2.json", &[question("level two")]);

        let loader = FileContentLoader::new(&dir);
        let set = loader.load_questions(2).await.unwrap();
        assert_eq!(set.get(0).unwrap().text(), "level two");
        assert_eq!(set.level(), 2);
    }

    #[tokio::test]
    async fn missing_level_falls_back_to_default() {
        let dir = scratch_dir("fallback");
        write_set(&dir, "questions.json", &[question("default")]);

        let loader = FileContentLoader::new(&dir);
        let set = loader.load_questions(3).await.unwrap();
        assert_eq!(set.get(0).unwrap().text(), "default");
    }

    #[tokio::test]
    async fn broken_level_file_falls_back_to_default() {
        let dir = scratch_dir("broken");
        write_set(&dir, "questions.json", &[question("default")]);
        std::fs::write(dir.join("questions-level-2.json"), "{not json").unwrap();

        let loader = FileContentLoader::new(&dir);
        let set = loader.load_questions(2).await.unwrap();
        assert_eq!(set.get(0).unwrap().text(), "default");
    }

    #[tokio::test]
    async fn no_content_at_all_is_an_error() {
        let dir = scratch_dir("none");
        let loader = FileContentLoader::new(&dir);
        let err = loader.load_questions(1).await.unwrap_err();
        assert!(matches!(err, ContentError::Missing { .. }));
    }

    #[tokio::test]
    async fn static_loader_prefers_level_sets() {
        let loader = StaticContentLoader::with_default(vec![question("default")])
            .with_level(2, vec![question("level two")]);
        assert_eq!(
            loader.load_questions(2).await.unwrap().get(0).unwrap().text(),
            "level two"
        );
        assert_eq!(
            loader.load_questions(1).await.unwrap().get(0).unwrap().text(),
            "default"
        );
        assert!(StaticContentLoader::empty().load_questions(1).await.is_err());
    }
}
