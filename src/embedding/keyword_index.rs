//! Tantivy keyword index over context embed text

use std::path::PathBuf;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyError, Term};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeywordIndexError {
    #[error("Index initialization failed: {0}")]
    Initialization(String),

    #[error("Insert failed: {0}")]
    Insert(String),

    #[error("Search failed: {0}")]
    Search(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tantivy error: {0}")]
    Tantivy(#[from] TantivyError),

    #[error("Query parsing error: {0}")]
    QueryParse(String),
}

#[derive(Debug, Clone)]
pub struct KeywordSearchResult {
    pub id: String,
    /// BM25 relevance score
    pub score: f32,
    pub snippet: String,
}

/// Full-text index with BM25 ranking, one document per context
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: IndexWriter,
    id_field: Field,
    user_field: Field,
    text_field: Field,
    #[allow(dead_code)]
    index_path: PathBuf,
}

impl KeywordIndex {
    pub fn new(index_path: PathBuf) -> Result<Self, KeywordIndexError> {
        if index_path.exists() && index_path.join("meta.json").exists() {
            Self::load(index_path)
        } else {
            Self::create(index_path)
        }
    }

    fn create(index_path: PathBuf) -> Result<Self, KeywordIndexError> {
        std::fs::create_dir_all(&index_path)?;

        let mut schema_builder = Schema::builder();
        schema_builder.add_text_field("id", STRING | STORED);
        schema_builder.add_text_field("user_id", STRING | STORED);
        schema_builder.add_text_field("text", TEXT | STORED);
        let schema = schema_builder.build();

        let index = Index::create_in_dir(&index_path, schema)
            .map_err(|e| KeywordIndexError::Initialization(e.to_string()))?;
        Self::open(index, index_path)
    }

    fn load(index_path: PathBuf) -> Result<Self, KeywordIndexError> {
        let index = Index::open_in_dir(&index_path)
            .map_err(|e| KeywordIndexError::Initialization(e.to_string()))?;
        Self::open(index, index_path)
    }

    fn open(index: Index, index_path: PathBuf) -> Result<Self, KeywordIndexError> {
        let schema = index.schema();
        let id_field = schema.get_field("id").map_err(|_| {
            KeywordIndexError::Initialization("Missing 'id' field in schema".to_string())
        })?;
        let user_field = schema.get_field("user_id").map_err(|_| {
            KeywordIndexError::Initialization("Missing 'user_id' field in schema".to_string())
        })?;
        let text_field = schema.get_field("text").map_err(|_| {
            KeywordIndexError::Initialization("Missing 'text' field in schema".to_string())
        })?;

        let writer = index
            .writer(50_000_000)
            .map_err(|e| KeywordIndexError::Initialization(e.to_string()))?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e: TantivyError| KeywordIndexError::Initialization(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer,
            id_field,
            user_field,
            text_field,
            index_path,
        })
    }

    /// Insert or replace the document for a context id
    pub fn upsert(&mut self, id: &str, user_id: &str, text: &str) -> Result<(), KeywordIndexError> {
        self.writer
            .delete_term(Term::from_field_text(self.id_field, id));
        self.writer
            .add_document(doc!(
                self.id_field => id,
                self.user_field => user_id,
                self.text_field => text,
            ))
            .map_err(|e| KeywordIndexError::Insert(e.to_string()))?;
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> Result<(), KeywordIndexError> {
        self.writer
            .delete_term(Term::from_field_text(self.id_field, id));
        Ok(())
    }

    pub fn commit(&mut self) -> Result<(), KeywordIndexError> {
        self.writer
            .commit()
            .map_err(|e| KeywordIndexError::Insert(e.to_string()))?;
        self.reader
            .reload()
            .map_err(|e| KeywordIndexError::Search(e.to_string()))?;
        Ok(())
    }

    /// Search one user's contexts
    pub fn search(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<KeywordSearchResult>, KeywordIndexError> {
        let searcher = self.reader.searcher();

        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let text_query = query_parser
            .parse_query(query)
            .map_err(|e| KeywordIndexError::QueryParse(e.to_string()))?;

        let user_query: Box<dyn Query> = Box::new(TermQuery::new(
            Term::from_field_text(self.user_field, user_id),
            IndexRecordOption::Basic,
        ));
        let scoped = BooleanQuery::new(vec![(Occur::Must, user_query), (Occur::Must, text_query)]);

        let top_docs = searcher
            .search(&scoped, &TopDocs::with_limit(limit))
            .map_err(|e| KeywordIndexError::Search(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved: tantivy::TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| KeywordIndexError::Search(e.to_string()))?;

            let id = retrieved
                .get_first(self.id_field)
                .and_then(|v| v.as_str())
                .ok_or_else(|| KeywordIndexError::Search("Missing id field".to_string()))?
                .to_string();

            let text = retrieved
                .get_first(self.text_field)
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let snippet = if text.len() > 200 {
                let mut end = 200;
                while !text.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}...", &text[..end])
            } else {
                text.to_string()
            };

            results.push(KeywordSearchResult { id, score, snippet });
        }

        Ok(results)
    }

    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_upsert_and_search() {
        let temp = TempDir::new().unwrap();
        let mut index = KeywordIndex::new(temp.path().join("kw")).unwrap();

        index.upsert("c1", "u1", "Morning run along the river").unwrap();
        index.upsert("c2", "u1", "Dinner with friends at a pizzeria").unwrap();
        index.commit().unwrap();

        let results = index.search("u1", "river", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "c1");
    }

    #[test]
    fn test_user_scoping() {
        let temp = TempDir::new().unwrap();
        let mut index = KeywordIndex::new(temp.path().join("kw")).unwrap();

        index.upsert("c1", "u1", "secret plans").unwrap();
        index.commit().unwrap();

        assert!(index.search("u2", "secret", 10).unwrap().is_empty());
        assert_eq!(index.search("u1", "secret", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_replaces_document() {
        let temp = TempDir::new().unwrap();
        let mut index = KeywordIndex::new(temp.path().join("kw")).unwrap();

        index.upsert("c1", "u1", "old text about cats").unwrap();
        index.commit().unwrap();
        index.upsert("c1", "u1", "new text about dogs").unwrap();
        index.commit().unwrap();

        assert_eq!(index.len(), 1);
        assert!(index.search("u1", "cats", 10).unwrap().is_empty());
        assert_eq!(index.search("u1", "dogs", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_delete() {
        let temp = TempDir::new().unwrap();
        let mut index = KeywordIndex::new(temp.path().join("kw")).unwrap();

        index.upsert("c1", "u1", "ephemeral").unwrap();
        index.commit().unwrap();
        index.delete("c1").unwrap();
        index.commit().unwrap();

        assert!(index.is_empty());
    }

    #[test]
    fn test_reload_from_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("kw");

        {
            let mut index = KeywordIndex::new(path.clone()).unwrap();
            index.upsert("c1", "u1", "persisted document").unwrap();
            index.commit().unwrap();
        }

        let index = KeywordIndex::new(path).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.search("u1", "persisted", 10).unwrap().len(), 1);
    }
}
