//! Lexical search using Tantivy (BM25)
//!
//! Indexes each exemplar's `description + sql` under its id. The index is
//! built in RAM at snapshot load and is immutable afterwards; a corpus
//! rebuild produces a fresh snapshot.

use std::sync::Arc;

use tantivy::{
    collector::TopDocs,
    query::QueryParser,
    schema::{Field, OwnedValue, Schema, TextFieldIndexing, TextOptions, STORED, STRING},
    tokenizer::{Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, TextAnalyzer},
    Index, IndexReader, TantivyDocument,
};

use sqlscout_core::Exemplar;

use crate::RagError;

/// BM25 index over the exemplar corpus.
pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    id_field: Field,
    body_field: Field,
    doc_count: usize,
}

impl LexicalIndex {
    /// Build an in-RAM index from the corpus.
    pub fn build(exemplars: &[Arc<Exemplar>]) -> Result<Self, RagError> {
        let mut schema_builder = Schema::builder();

        let body_options = TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("sql_text")
                .set_index_option(tantivy::schema::IndexRecordOption::WithFreqsAndPositions),
        );

        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let body_field = schema_builder.add_text_field("body", body_options);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        index.tokenizers().register("sql_text", Self::build_tokenizer());

        {
            let mut writer = index
                .writer(50_000_000)
                .map_err(|e| RagError::Index(e.to_string()))?;

            for exemplar in exemplars {
                let mut doc = TantivyDocument::default();
                doc.add_text(id_field, &exemplar.id);
                doc.add_text(
                    body_field,
                    format!("{}\n{}", exemplar.description, exemplar.sql),
                );
                writer
                    .add_document(doc)
                    .map_err(|e| RagError::Index(e.to_string()))?;
            }

            writer.commit().map_err(|e| RagError::Index(e.to_string()))?;
        }

        let reader = index.reader().map_err(|e| RagError::Index(e.to_string()))?;

        tracing::debug!(docs = exemplars.len(), "Lexical index built");

        Ok(Self {
            index,
            reader,
            id_field,
            body_field,
            doc_count: exemplars.len(),
        })
    }

    /// SQL keywords and identifiers stem poorly with aggressive stemmers;
    /// English stemming keeps description prose matching reasonable.
    fn build_tokenizer() -> TextAnalyzer {
        TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(100))
            .filter(LowerCaser)
            .filter(Stemmer::new(Language::English))
            .build()
    }

    /// BM25 top-k: `(exemplar id, raw score)`, score descending.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<(String, f32)>, RagError> {
        if k == 0 || self.doc_count == 0 {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let query_parser = QueryParser::for_index(&self.index, vec![self.body_field]);

        // Lenient parse: user questions are raw text, not query syntax.
        let (parsed, _errors) = query_parser.parse_query_lenient(query);

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(k))
            .map_err(|e| RagError::Search(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| RagError::Search(e.to_string()))?;

            let id = doc
                .get_first(self.id_field)
                .and_then(|v| match v {
                    OwnedValue::Str(s) => Some(s.as_str()),
                    _ => None,
                })
                .unwrap_or("")
                .to_string();

            results.push((id, score));
        }

        Ok(results)
    }

    pub fn doc_count(&self) -> usize {
        self.doc_count
    }
}
