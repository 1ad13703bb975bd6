//! `sentinelle seed`: load demo knowledge, imagery and reputation records.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use sentinelle_core::archivist::Archivist;

use crate::embedding::{ImageEmbedder, TextEmbedder};
use crate::services::Services;

pub const SEED_KNOWLEDGE: [&str; 4] = [
    "Definition: Image-based sexual abuse (often called 'revenge porn') is a form of GBV.",
    "Helpline: If you are in danger, contact local authorities. Seek support from trusted organizations.",
    "Threats, stalking, and doxxing are forms of GBV when directed based on gender.",
    "Common obfuscations include numeric substitutions (e.g., r4pe) and leetspeak.",
];

/// `(user_id, toxicity_score, summary)`.
pub const SEED_PROFILES: [(&str, f64, &str); 2] = [
    ("user123", 0.8, "Prior harassment reports in July."),
    ("user456", 0.1, "No prior flags."),
];

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Debug, Default, PartialEq)]
pub struct SeedSummary {
    pub knowledge: usize,
    pub images: usize,
    pub images_skipped: usize,
    pub profiles: usize,
}

pub async fn run_seed(services: &Services, images: Option<&Path>) -> Result<()> {
    let Some(text) = services.text_embedder.as_deref() else {
        bail!("Seeding requires a text embedder; set [embedding.text] provider");
    };

    let summary = seed(
        &services.archivist,
        text,
        services.image_embedder.as_deref(),
        images,
    )
    .await?;

    println!(
        "Seeded {} knowledge entries, {} images ({} skipped), {} profiles.",
        summary.knowledge, summary.images, summary.images_skipped, summary.profiles
    );
    Ok(())
}

pub async fn seed(
    archivist: &Archivist,
    text: &dyn TextEmbedder,
    image: Option<&dyn ImageEmbedder>,
    images: Option<&Path>,
) -> Result<SeedSummary> {
    archivist.ensure_collections().await?;
    let mut summary = SeedSummary::default();

    let kb: Vec<String> = SEED_KNOWLEDGE.iter().map(|s| s.to_string()).collect();
    let vectors = text.embed(&kb).await.context("Failed to embed seed knowledge")?;
    for (entry, vector) in kb.iter().zip(vectors) {
        archivist
            .upsert_kb(entry, vector, vec!["kb".to_string()])
            .await?;
        summary.knowledge += 1;
    }
    tracing::info!(count = summary.knowledge, "seeded knowledge base");

    if let Some(dir) = images {
        match image {
            Some(embedder) => {
                for path in image_files(dir)? {
                    let file = path
                        .file_name()
                        .map(|f| f.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let bytes = std::fs::read(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    match embedder.embed(&bytes).await {
                        Ok(vector) => {
                            archivist
                                .upsert_toxic_image(vector, &format!("seed:{}", file), "toxic")
                                .await?;
                            summary.images += 1;
                        }
                        Err(e) => {
                            tracing::warn!(file = %file, error = %e, "skipping seed image");
                            summary.images_skipped += 1;
                        }
                    }
                }
                tracing::info!(count = summary.images, dir = %dir.display(), "seeded toxic imagery");
            }
            None => {
                tracing::warn!(dir = %dir.display(), "image embeddings disabled; skipping seed images");
            }
        }
    }

    let summaries: Vec<String> = SEED_PROFILES.iter().map(|(_, _, s)| s.to_string()).collect();
    let vectors = text
        .embed(&summaries)
        .await
        .context("Failed to embed seed profiles")?;
    for ((user_id, score, note), vector) in SEED_PROFILES.iter().zip(vectors) {
        archivist
            .upsert_user_profile(user_id, vector, *score, note)
            .await?;
        summary.profiles += 1;
    }
    tracing::info!(count = summary.profiles, "seeded user reputation");

    Ok(summary)
}

/// `.png`/`.jpg`/`.jpeg` files directly under `dir`, sorted by name.
fn image_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read image directory: {}", dir.display()))?
    {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if path.is_file() && is_image {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sentinelle_core::archivist::RetrievalParams;
    use sentinelle_core::schema::Schema;
    use sentinelle_core::store::memory::InMemoryStore;
    use std::sync::Arc;

    struct Flat;

    #[async_trait]
    impl TextEmbedder for Flat {
        fn model_name(&self) -> &str {
            "flat"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    /// Rejects anything that does not start with the PNG magic.
    struct PngOnly;

    #[async_trait]
    impl ImageEmbedder for PngOnly {
        fn model_name(&self) -> &str {
            "png-only"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, image: &[u8]) -> Result<Vec<f32>> {
            if image.starts_with(b"\x89PNG") {
                Ok(vec![0.0, 1.0])
            } else {
                bail!("not a png")
            }
        }
    }

    fn archivist(store: Arc<InMemoryStore>) -> Archivist {
        Archivist::new(store, Schema::new(2, 2), RetrievalParams::default())
    }

    #[tokio::test]
    async fn test_seed_inserts_knowledge_and_profiles() {
        let store = Arc::new(InMemoryStore::new());
        let archivist = archivist(store.clone());
        let summary = seed(&archivist, &Flat, None, None).await.unwrap();

        assert_eq!(summary.knowledge, 4);
        assert_eq!(summary.profiles, 2);
        assert_eq!(store.count("gbv_knowledge_base"), Some(4));
        assert_eq!(store.count("user_reputation"), Some(2));

        let history = archivist.retrieve_history("user123").await.unwrap();
        assert_eq!(history.flags, 1);
        assert_eq!(history.toxicity_score, 0.8);
        assert_eq!(history.notes, vec!["Prior harassment reports in July."]);
    }

    #[tokio::test]
    async fn test_seed_images_skips_failures_and_other_files() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.png"), b"\x89PNG....").unwrap();
        std::fs::write(dir.path().join("b.JPG"), b"garbage").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignore me").unwrap();

        let store = Arc::new(InMemoryStore::new());
        let archivist = archivist(store.clone());
        let summary = seed(&archivist, &Flat, Some(&PngOnly), Some(dir.path()))
            .await
            .unwrap();

        assert_eq!(summary.images, 1);
        assert_eq!(summary.images_skipped, 1);
        assert_eq!(store.count("toxic_imagery"), Some(1));

        let hits = archivist
            .retrieve_image_similarity(Some(&[0.0f32, 1.0][..]), 5)
            .await
            .unwrap();
        assert_eq!(hits.matches[0].caption, "seed:a.png");
        assert_eq!(hits.matches[0].label, "toxic");
    }

    #[tokio::test]
    async fn test_seed_twice_appends() {
        let store = Arc::new(InMemoryStore::new());
        let archivist = archivist(store.clone());
        seed(&archivist, &Flat, None, None).await.unwrap();
        seed(&archivist, &Flat, None, None).await.unwrap();
        let history = archivist.retrieve_history("user123").await.unwrap();
        assert_eq!(history.flags, 2);
    }
}
