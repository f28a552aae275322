/// A canned repair recipe: a set of signature groups matched against the
/// `pip check` output, and the pip-install invocations that resolve the
/// known tangle. Adding a recipe is a table edit.
pub(crate) struct Recipe {
    pub(crate) name: &'static str,
    /// The recipe fires when every substring of at least one group appears
    /// in the lowercased output.
    pub(crate) signatures: &'static [&'static [&'static str]],
    /// Argument lists passed to `pip install`, in order.
    pub(crate) steps: &'static [&'static [&'static str]],
}

pub(crate) const RECIPES: &[Recipe] = &[
    Recipe {
        name: "shaderflow-gradio-depthflow-rembg",
        signatures: &[&["shaderflow"], &["depthflow"], &["gradio"], &["rembg"]],
        steps: &[
            &["scipy~=1.15.3"],
            &["pillow<12"],
            &["rembg==2.0.69"],
            &["onnxruntime"],
            &["--no-deps", "gradio==5.35.0", "shaderflow==0.9.1"],
        ],
    },
    Recipe {
        name: "fastapi-sse-starlette",
        signatures: &[&["fastapi", "sse-starlette"], &["sse-starlette"], &["starlette"]],
        steps: &[&["starlette>=0.40.0,<0.47.0"], &["sse-starlette<3.0"]],
    },
    Recipe {
        name: "typer-click",
        signatures: &[&["typer", "click"]],
        steps: &[&["typer==0.15.4"], &["typer-slim==0.15.4"], &["click<8.2,>=8.0.0"]],
    },
];

/// The first recipe whose signature matches, in table order.
pub(crate) fn match_recipe(pip_check_output: &str) -> Option<&'static Recipe> {
    let haystack = pip_check_output.to_lowercase();
    RECIPES.iter().find(|recipe| {
        recipe
            .signatures
            .iter()
            .any(|group| group.iter().all(|needle| haystack.contains(needle)))
    })
}

#[cfg(test)]
mod tests {
    use super::match_recipe;

    #[test]
    fn shaderflow_family_matches_on_any_member() {
        for fragment in ["shaderflow 0.9.1", "DepthFlow 1.0", "gradio 5.x", "rembg 2.0.50"] {
            let output = format!("{fragment} has requirement scipy~=1.15.3, but you have scipy 1.16.0.");
            assert_eq!(
                match_recipe(&output).unwrap().name,
                "shaderflow-gradio-depthflow-rembg",
                "{fragment}"
            );
        }
    }

    #[test]
    fn starlette_alone_selects_the_sse_recipe() {
        let output = "fastapi 0.110.0 has requirement starlette<0.37.0, but you have starlette 0.47.0.";
        assert_eq!(match_recipe(output).unwrap().name, "fastapi-sse-starlette");
    }

    #[test]
    fn typer_click_needs_both() {
        let output = "typer 0.15.4 has requirement click<8.2, but you have click 8.2.1.";
        assert_eq!(match_recipe(output).unwrap().name, "typer-click");
        assert!(match_recipe("clickhouse-driver 0.2 requires pytz, which is not installed.").is_none());
    }

    #[test]
    fn unknown_output_matches_nothing() {
        assert!(match_recipe("torchsde 0.2.6 has requirement torch>=2.5, but you have torch 2.4.0.").is_none());
    }
}
