//! Format constants and well-known metadata keys.

/// The four bytes every GGUF file starts with, independent of byte order.
pub const GGUF_MAGIC: [u8; 4] = *b"GGUF";
/// Version written by this crate.
pub const GGUF_VERSION: u32 = 3;
/// Oldest version the reader accepts (best-effort).
pub const GGUF_VERSION_MIN: u32 = 2;
/// Alignment used when `general.alignment` is absent.
pub const GGUF_DEFAULT_ALIGNMENT: u32 = 32;
/// Size of the fixed header: magic + version + tensor count + metadata count.
pub const GGUF_HEADER_LEN: u64 = 24;
/// Maximum tensor rank understood by ggml.
pub const GGML_MAX_DIMS: usize = 4;
/// Quantization layout version recorded by current writers.
pub const GGML_QUANTIZATION_VERSION: u32 = 2;

/// Standard metadata keys.
pub mod keys {
    pub mod general {
        pub const TYPE: &str = "general.type";
        pub const ARCHITECTURE: &str = "general.architecture";
        pub const QUANTIZATION_VERSION: &str = "general.quantization_version";
        pub const ALIGNMENT: &str = "general.alignment";
        pub const FILE_TYPE: &str = "general.file_type";
        pub const NAME: &str = "general.name";
        pub const AUTHOR: &str = "general.author";
        pub const VERSION: &str = "general.version";
        pub const ORGANIZATION: &str = "general.organization";
        pub const FINETUNE: &str = "general.finetune";
        pub const BASENAME: &str = "general.basename";
        pub const DESCRIPTION: &str = "general.description";
        pub const QUANTIZED_BY: &str = "general.quantized_by";
        pub const SIZE_LABEL: &str = "general.size_label";
        pub const LICENSE: &str = "general.license";
        pub const URL: &str = "general.url";
        pub const TAGS: &str = "general.tags";
        pub const LANGUAGES: &str = "general.languages";
    }

    pub mod adapter {
        pub const TYPE: &str = "adapter.type";
        pub const LORA_ALPHA: &str = "adapter.lora.alpha";
    }

    /// Per-architecture keys; `{arch}` is substituted by [`arch_key`](super::arch_key).
    pub mod llm {
        pub const VOCAB_SIZE: &str = "{arch}.vocab_size";
        pub const CONTEXT_LENGTH: &str = "{arch}.context_length";
        pub const EMBEDDING_LENGTH: &str = "{arch}.embedding_length";
        pub const BLOCK_COUNT: &str = "{arch}.block_count";
        pub const FEED_FORWARD_LENGTH: &str = "{arch}.feed_forward_length";
        pub const ATTENTION_HEAD_COUNT: &str = "{arch}.attention.head_count";
        pub const ATTENTION_HEAD_COUNT_KV: &str = "{arch}.attention.head_count_kv";
        pub const ATTENTION_LAYER_NORM_RMS_EPS: &str = "{arch}.attention.layer_norm_rms_epsilon";
        pub const ROPE_DIMENSION_COUNT: &str = "{arch}.rope.dimension_count";
        pub const ROPE_FREQ_BASE: &str = "{arch}.rope.freq_base";
    }
}

/// Expand an `{arch}.*` key template for a concrete architecture.
///
/// ```
/// use llamakit_gguf::constants::{arch_key, keys};
/// assert_eq!(arch_key(keys::llm::CONTEXT_LENGTH, "llama"), "llama.context_length");
/// ```
pub fn arch_key(template: &str, arch: &str) -> String {
    template.replace("{arch}", arch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_is_ascii_gguf() {
        assert_eq!(&GGUF_MAGIC, b"GGUF");
        assert_eq!(u32::from_le_bytes(GGUF_MAGIC), 0x4655_4747);
    }

    #[test]
    fn arch_key_substitutes_every_template() {
        assert_eq!(arch_key(keys::llm::BLOCK_COUNT, "qwen2"), "qwen2.block_count");
        assert_eq!(
            arch_key(keys::llm::ATTENTION_HEAD_COUNT_KV, "llama"),
            "llama.attention.head_count_kv"
        );
        assert_eq!(arch_key(keys::general::NAME, "llama"), keys::general::NAME);
    }
}
