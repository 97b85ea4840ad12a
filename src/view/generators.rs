//! Query generators: read-only traversals of one `ViewDatabase` snapshot.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::SystemTime;

use super::clock::{process_start_time, ClockSpec};
use super::database::ViewDatabase;
use super::entry::{DirId, FileId};
use super::file_result::InMemoryFileResult;
use super::inmemory::InMemoryView;
use crate::error::{QueryError, ViewError};
use crate::query::{GlobNode, GlobTree, Predicate, Query, QueryContext, QueryPath, QueryResult};
use crate::Result;

/// A `since` resolved against this view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResolvedSince {
    /// The clock cannot be honored; report every existing file.
    FreshInstance,
    Ticks(u32),
    Timestamp(SystemTime),
}

/// Everything a generator needs besides the database and the context.
struct Traversal<'a> {
    db: &'a ViewDatabase,
    root_path: &'a Path,
    query_root: &'a Path,
    caches: &'a Arc<crate::cache::InMemoryViewCaches>,
}

impl Traversal<'_> {
    /// Offer one file to the context. Returns false once the query is full.
    fn emit(&self, ctx: &mut QueryContext<'_>, id: FileId) -> bool {
        let file = self.db.file(id);
        let dir_path = self.db.dir(file.parent()).path();
        let Ok(dir_name) = dir_path.strip_prefix(self.query_root) else {
            return true;
        };
        let Ok(root_relative_dir) = dir_path.strip_prefix(self.root_path) else {
            return true;
        };
        ctx.process(Box::new(InMemoryFileResult::new(
            file,
            dir_name.to_path_buf(),
            root_relative_dir,
            Arc::clone(self.caches),
        )))
    }

    fn time_generator(&self, ctx: &mut QueryContext<'_>, since: ResolvedSince) {
        for (id, file) in self.db.recency() {
            let keep_going = match since {
                ResolvedSince::FreshInstance => !file.exists() || self.emit(ctx, id),
                ResolvedSince::Ticks(ticks) => {
                    if file.otime().ticks < ticks {
                        break;
                    }
                    self.emit(ctx, id)
                }
                ResolvedSince::Timestamp(timestamp) => {
                    if file.otime().timestamp < timestamp {
                        break;
                    }
                    self.emit(ctx, id)
                }
            };
            if !keep_going {
                break;
            }
        }
    }

    fn all_files_generator(&self, ctx: &mut QueryContext<'_>) {
        for (id, _) in self.db.recency() {
            if !self.emit(ctx, id) {
                break;
            }
        }
    }

    fn path_generator(&self, ctx: &mut QueryContext<'_>, paths: &[QueryPath]) {
        for query_path in paths {
            let full = self.query_root.join(&query_path.name);

            if let Some(dir) = self.db.resolve_dir(&full) {
                if !self.dir_generator(ctx, dir, query_path.depth) {
                    return;
                }
                continue;
            }

            // Not a directory we know about; it may name a single file.
            let file = full.parent().zip(full.file_name()).and_then(|(parent, name)| {
                self.db
                    .resolve_dir(parent)
                    .and_then(|dir| self.db.dir(dir).child_file(name))
            });
            if let Some(id) = file {
                if !self.emit(ctx, id) {
                    return;
                }
            }
        }
    }

    /// Emit every file below `dir`, descending `depth` more levels
    /// (`None` is unlimited).
    fn dir_generator(&self, ctx: &mut QueryContext<'_>, dir: DirId, depth: Option<u32>) -> bool {
        let mut stack = vec![(dir, depth)];
        while let Some((current, remaining)) = stack.pop() {
            let node = self.db.dir(current);
            for (_, id) in node.files() {
                if !self.emit(ctx, id) {
                    return false;
                }
            }
            let next = match remaining {
                None => None,
                Some(0) => continue,
                Some(n) => Some(n - 1),
            };
            stack.extend(node.dirs().map(|(_, child)| (child, next)));
        }
        true
    }

    fn glob_generator(&self, ctx: &mut QueryContext<'_>, tree: &GlobTree) {
        let Some(start) = self.db.resolve_dir(self.query_root) else {
            return;
        };
        self.glob_generator_tree(ctx, tree, tree.root(), start);
    }

    fn glob_generator_tree(
        &self,
        ctx: &mut QueryContext<'_>,
        tree: &GlobTree,
        node: &GlobNode,
        dir: DirId,
    ) -> bool {
        let dots = tree.include_dotfiles();
        let entry = self.db.dir(dir);

        for child in node.children() {
            if let Some(literal) = child.literal() {
                if child.is_leaf() {
                    if let Some(id) = entry.child_file(literal) {
                        if self.db.file(id).exists() && !self.emit(ctx, id) {
                            return false;
                        }
                    }
                }
                if child.has_children() {
                    if let Some(sub) = entry.child_dir(literal) {
                        if !self.glob_generator_tree(ctx, tree, child, sub) {
                            return false;
                        }
                    }
                }
                continue;
            }

            if child.is_leaf() {
                for (name, id) in entry.files() {
                    if self.db.file(id).exists()
                        && child.matches_name(name, dots)
                        && !self.emit(ctx, id)
                    {
                        return false;
                    }
                }
            }
            if child.has_children() {
                for (name, sub) in entry.dirs() {
                    if child.matches_name(name, dots) && !self.glob_generator_tree(ctx, tree, child, sub) {
                        return false;
                    }
                }
            }
        }

        for doublestar in node.doublestars() {
            if !self.glob_generator_doublestar(ctx, doublestar, dir, dots) {
                return false;
            }
        }
        true
    }

    fn glob_generator_doublestar(
        &self,
        ctx: &mut QueryContext<'_>,
        doublestar: &crate::query::DoublestarMatch,
        dir: DirId,
        dots: bool,
    ) -> bool {
        let mut stack = vec![(dir, PathBuf::new())];
        while let Some((current, relative)) = stack.pop() {
            let entry = self.db.dir(current);
            for (name, id) in entry.files() {
                if self.db.file(id).exists()
                    && doublestar.matches(&relative.join(name), dots)
                    && !self.emit(ctx, id)
                {
                    return false;
                }
            }
            for (name, sub) in entry.dirs() {
                if doublestar.may_descend_into(name, dots) {
                    stack.push((sub, relative.join(name)));
                }
            }
        }
        true
    }
}

impl InMemoryView {
    pub(crate) fn resolve_since(&self, since: &ClockSpec) -> ResolvedSince {
        match *since {
            ClockSpec::Timestamp(timestamp) => ResolvedSince::Timestamp(timestamp),
            ClockSpec::Clock {
                start_time,
                pid,
                position,
            } => {
                let current = self.get_most_recent_root_number_and_tick_value();
                if start_time != process_start_time()
                    || pid != std::process::id()
                    || position.root_number != current.root_number
                    || position.ticks <= self.last_age_out_tick.load(Ordering::Acquire)
                {
                    ResolvedSince::FreshInstance
                } else {
                    ResolvedSince::Ticks(position.ticks)
                }
            }
        }
    }

    /// Evaluate `query` against one consistent snapshot.
    ///
    /// # Errors
    ///
    /// - `ViewError::NotReady` before the initial crawl has completed
    /// - `QueryError::InvalidGlob` for a pattern that does not compile
    pub fn run_query(&self, query: &Query, predicate: &dyn Predicate) -> Result<QueryResult> {
        if !self.is_ready() {
            return Err(ViewError::NotReady.into());
        }

        let query_root = match &query.relative_root {
            Some(relative) if relative.is_absolute() => {
                return Err(QueryError::Predicate(format!(
                    "relative_root '{}' must be relative",
                    relative.display()
                ))
                .into());
            }
            Some(relative) => self.root_path.join(relative),
            None => self.root_path.clone(),
        };
        let case_sensitive = query.case_sensitive.unwrap_or(self.config.case_sensitive);
        let glob_tree = if query.globs.is_empty() {
            None
        } else {
            Some(GlobTree::new(&query.globs, query.include_dotfiles, case_sensitive)?)
        };

        let mut ctx = QueryContext::new(predicate, query.limit);
        let mut is_fresh_instance = false;

        let clock = {
            let db = self.db.read();
            let clock = self.get_most_recent_root_number_and_tick_value();
            let traversal = Traversal {
                db: &db,
                root_path: &self.root_path,
                query_root: &query_root,
                caches: &self.caches,
            };

            if let Some(since) = &query.since {
                let resolved = self.resolve_since(since);
                is_fresh_instance = resolved == ResolvedSince::FreshInstance;
                traversal.time_generator(&mut ctx, resolved);
            } else if !query.paths.is_empty() {
                traversal.path_generator(&mut ctx, &query.paths);
            } else if let Some(tree) = &glob_tree {
                traversal.glob_generator(&mut ctx, tree);
            } else {
                traversal.all_files_generator(&mut ctx);
            }
            clock
        };

        let (files, errors, num_walked) = ctx.into_parts();
        if query.prefetch_content_hashes {
            if let Some(first) = files.first() {
                first.batch_fetch_properties(&files);
            }
        }

        tracing::debug!(
            root = %self.root_path.display(),
            ticks = clock.ticks,
            matched = files.len(),
            num_walked,
            is_fresh_instance,
            "Query complete"
        );

        Ok(QueryResult {
            clock,
            is_fresh_instance,
            files,
            errors,
            num_walked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::query::MatchAll;
    use crate::view::ClockPosition;
    use crate::watcher::ManualWatcher;
    use crate::watcher::WatcherFlags;
    use std::fs;
    use tempfile::TempDir;

    fn crawled_view(files: &[&str]) -> (TempDir, InMemoryView) {
        let tmp = TempDir::new().unwrap();
        for f in files {
            let path = tmp.path().join(f);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, f.as_bytes()).unwrap();
        }
        let view = InMemoryView::new(
            tmp.path(),
            Config::default(),
            Arc::new(ManualWatcher::new(WatcherFlags::empty())),
        )
        .unwrap();
        view.client_mode_crawl().unwrap();
        (tmp, view)
    }

    fn sorted(result: &QueryResult) -> Vec<PathBuf> {
        let mut paths = result.paths();
        paths.sort();
        paths
    }

    #[test]
    fn test_not_ready_before_crawl() {
        let tmp = TempDir::new().unwrap();
        let view = InMemoryView::new(
            tmp.path(),
            Config::default(),
            Arc::new(ManualWatcher::new(WatcherFlags::empty())),
        )
        .unwrap();
        let err = view.run_query(&Query::new(), &MatchAll).unwrap_err();
        assert!(matches!(err, crate::Error::View(ViewError::NotReady)));
    }

    #[test]
    fn test_all_files() {
        let (_tmp, view) = crawled_view(&["a.txt", "src/main.rs"]);
        let result = view.run_query(&Query::new(), &MatchAll).unwrap();
        assert_eq!(
            sorted(&result),
            vec![
                PathBuf::from("a.txt"),
                PathBuf::from("src"),
                PathBuf::from("src/main.rs")
            ]
        );
        assert!(!result.is_fresh_instance);
    }

    #[test]
    fn test_glob_query() {
        let (_tmp, view) = crawled_view(&["a.rs", "src/b.rs", "src/deep/c.rs", "src/d.txt", ".hidden.rs"]);

        let top = view
            .run_query(&Query::new().with_glob("*.rs"), &MatchAll)
            .unwrap();
        assert_eq!(sorted(&top), vec![PathBuf::from("a.rs")]);

        let all = view
            .run_query(&Query::new().with_glob("**/*.rs"), &MatchAll)
            .unwrap();
        assert_eq!(
            sorted(&all),
            vec![
                PathBuf::from("a.rs"),
                PathBuf::from("src/b.rs"),
                PathBuf::from("src/deep/c.rs")
            ]
        );

        let literal = view
            .run_query(&Query::new().with_glob("src/d.txt"), &MatchAll)
            .unwrap();
        assert_eq!(sorted(&literal), vec![PathBuf::from("src/d.txt")]);
    }

    #[test]
    fn test_path_query_with_depth() {
        let (_tmp, view) = crawled_view(&["src/a.rs", "src/x/b.rs", "src/x/y/c.rs"]);

        let shallow = view
            .run_query(&Query::new().with_path(QueryPath::new("src", Some(0))), &MatchAll)
            .unwrap();
        assert_eq!(sorted(&shallow), vec![PathBuf::from("src/a.rs"), PathBuf::from("src/x")]);

        let deep = view
            .run_query(&Query::new().with_path(QueryPath::new("src", None)), &MatchAll)
            .unwrap();
        assert_eq!(deep.files.len(), 5);

        let single = view
            .run_query(&Query::new().with_path(QueryPath::new("src/a.rs", None)), &MatchAll)
            .unwrap();
        assert_eq!(sorted(&single), vec![PathBuf::from("src/a.rs")]);
    }

    #[test]
    fn test_relative_root() {
        let (_tmp, view) = crawled_view(&["top.rs", "sub/inner.rs"]);
        let result = view
            .run_query(&Query::new().relative_root("sub").with_glob("*.rs"), &MatchAll)
            .unwrap();
        assert_eq!(sorted(&result), vec![PathBuf::from("inner.rs")]);

        let all = view
            .run_query(&Query::new().relative_root("sub"), &MatchAll)
            .unwrap();
        assert_eq!(sorted(&all), vec![PathBuf::from("inner.rs")]);
    }

    #[test]
    fn test_since_future_tick_is_empty() {
        let (_tmp, view) = crawled_view(&["a"]);
        let current = view.get_most_recent_root_number_and_tick_value();
        let since = ClockSpec::from_position(ClockPosition::new(current.root_number, current.ticks + 1));
        let result = view.run_query(&Query::new().since(since), &MatchAll).unwrap();
        assert!(result.files.is_empty());
        assert!(!result.is_fresh_instance);
    }

    #[test]
    fn test_since_foreign_clock_is_fresh_instance() {
        let (_tmp, view) = crawled_view(&["a"]);
        let since = ClockSpec::parse("c:1:1:999:5").unwrap();
        let result = view.run_query(&Query::new().since(since), &MatchAll).unwrap();
        assert!(result.is_fresh_instance);
        assert_eq!(sorted(&result), vec![PathBuf::from("a")]);
    }

    #[test]
    fn test_limit() {
        let (_tmp, view) = crawled_view(&["a", "b", "c"]);
        let result = view.run_query(&Query::new().limit(2), &MatchAll).unwrap();
        assert_eq!(result.files.len(), 2);
    }

    #[test]
    fn test_invalid_glob_is_an_error() {
        let (_tmp, view) = crawled_view(&["a"]);
        let err = view
            .run_query(&Query::new().with_glob("[oops"), &MatchAll)
            .unwrap_err();
        assert!(matches!(err, crate::Error::Query(QueryError::InvalidGlob { .. })));
    }

    #[test]
    fn test_prefetch_content_hashes() {
        let (_tmp, view) = crawled_view(&["a", "b"]);
        let mut query = Query::new().with_glob("*");
        query.prefetch_content_hashes = true;
        let result = view.run_query(&query, &MatchAll).unwrap();

        let stats = view.caches.content_hash.stats();
        assert_eq!(stats.misses, 2);
        for file in &result.files {
            assert!(file.content_hash().is_some());
        }
        assert_eq!(view.caches.content_hash.stats().hits, 2);
    }
}
