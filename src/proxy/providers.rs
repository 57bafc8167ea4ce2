//! 提供商 -> 基础 URL 静态表与目标 URL 拼接

use std::collections::HashMap;

use once_cell::sync::Lazy;

static PROVIDER_URLS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("openai", "https://api.openai.com/v1"),
        ("openai-chat", "https://api.openai.com/v1/chat/completions"),
        ("dashscope", "https://dashscope.aliyuncs.com/compatible-mode/v1"),
        ("anthropic", "https://api.anthropic.com/v1"),
        ("googleai", "https://generativelanguage.googleapis.com/v1beta"),
        ("googleaibeta", "https://generativelanguage.googleapis.com/v1beta"),
        ("cohere", "https://api.cohere.ai/v1"),
        ("huggingface", "https://api-inference.huggingface.co/models"),
        ("replicate", "https://api.replicate.com/v1"),
        ("ai21", "https://api.ai21.com/v1"),
        ("stabilityai", "https://api.stability.ai/v1"),
        ("deepl", "https://api.deepl.com/v2"),
        ("mistralai", "https://api.mistral.ai/v1"),
        ("perplexityai", "https://api.perplexity.ai/v1"),
        ("baiduai", "https://aip.baidubce.com"),
        ("baiduairest", "https://aip.baidubce.com/rest/2.0"),
        ("paddle", "https://aip.baidubce.com/rpc/2.0/ai_custom"),
        ("tencentai", "https://ai.tencentcloudapi.com"),
        ("tencentaiapi", "https://api.ai.qq.com"),
        ("aliyunai", "https://ai.aliyun.com/api/v1"),
        ("huaweiai", "https://api.hicloud.com/ai/v1"),
        ("googlecloudai", "https://aiplatform.googleapis.com"),
        ("googleaiplatform", "https://aiplatform.googleapis.com/v1"),
        ("googlecloud", "https://language.googleapis.com/v1"),
        ("dialogflow", "https://dialogflow.googleapis.com/v2"),
        ("aws", "https://comprehend.us-east-1.amazonaws.com"),
        ("amazon", "https://runtime.sagemaker.amazonaws.com/v1"),
        ("amazonai", "https://apigateway.ap-northeast-1.amazonaws.com/ai"),
        ("azure", "https://api.cognitive.microsoft.com/sts/v1.0"),
        ("microsoftml", "https://api.ml.azure.com/v1.0"),
        ("microsoftaibeta", "https://api.cognitive.microsoft.com/v1"),
        ("ibmwatson", "https://api.us-south.language-translator.watson.cloud.ibm.com/v3"),
        ("ibmai", "https://api.ai.ibm.com/v1"),
        ("deepai", "https://api.deepai.org/api"),
        ("clarifai", "https://api.clarifai.com/v2"),
        ("assemblyai", "https://api.assemblyai.com/v2"),
        ("speechmatics", "https://asr.api.speechmatics.com/v2"),
        ("revai", "https://api.rev.ai/speechtotext/v1"),
        ("witai", "https://api.wit.ai/v1"),
        ("voiceflow", "https://api.voiceflow.com/v2"),
        ("runwayml", "https://api.runwayml.com/v1"),
        ("algorithmia", "https://api.algorithmia.com/v1"),
        ("wolframalpha", "https://api.wolframalpha.com/v1"),
        ("yandexai", "https://api.yandex.com/v1"),
        ("naverclova", "https://clova.ai/v1"),
        ("salesforceeinstein", "https://api.einstein.ai/v2"),
        ("datarobot", "https://api.datarobot.com/v2"),
        ("h2oai", "https://api.h2o.ai/v1"),
        ("faceplusplus", "https://api-us.faceplusplus.com/v3"),
        ("deepmind", "https://api.deepmind.com/v1"),
        ("eleutheraibeta", "https://api.eleuther.ai/v1beta"),
        ("opencognitive", "https://api.opencognitive.com/v1"),
        ("otterai", "https://api.otter.ai/v1"),
        ("lobeai", "https://api.lobe.ai/v1"),
        ("bigml", "https://bigml.io/andromeda"),
        ("rapidapi", "https://api.rapidapi.com/v1"),
        ("kite", "https://api.kite.com/v1"),
        ("samsungbixby", "https://api.bixby.com/v1"),
        ("oracleaibeta", "https://api.oracle.com/v1"),
        ("sapleonardo", "https://api.sap.com/v1"),
        ("accentureaibeta", "https://api.accenture.com/v1"),
        ("infosysnia", "https://api.infosys.com/v1"),
        ("tcsai", "https://api.tcs.com/v1"),
        ("cognizantai", "https://api.cognizant.com/v1"),
        ("wiproholmes", "https://api.wipro.com/v1"),
        ("capgeminiaibeta", "https://api.capgemini.com/v1"),
        ("atosaibeta", "https://api.atos.com/v1"),
        ("deloitteaibeta", "https://api.deloitte.com/v1"),
        ("eyaibeta", "https://api.ey.com/v1"),
        ("pwcaibeta", "https://api.pwc.com/v1"),
        ("kpmgaibeta", "https://api.kpmg.com/v1"),
        ("bcgaibeta", "https://api.bcg.com/v1"),
        ("mckinseyaibeta", "https://api.mckinsey.com/v1"),
        ("bainaibeta", "https://api.bain.com/v1"),
        ("boozallenaibeta", "https://api.boozallen.com/v1"),
        ("northropgrummanaibeta", "https://api.northropgrumman.com/v1"),
        ("lockheedmartinaibeta", "https://api.lockheedmartin.com/v1"),
        ("raytheonaibeta", "https://api.raytheon.com/v1"),
        ("generaldynamicsaibeta", "https://api.generaldynamics.com/v1"),
        ("boeingaibeta", "https://api.boeing.com/v1"),
        ("airbusaibeta", "https://api.airbus.com/v1"),
        ("spacexaibeta", "https://api.spacex.com/v1"),
        ("blueoriginaibeta", "https://api.blueorigin.com/v1"),
        ("virgingalacticaibeta", "https://api.virgingalactic.com/v1"),
        ("nasajplaibeta", "https://api.jpl.nasa.gov/v1"),
        ("esaaibeta", "https://api.esa.int/v1"),
        ("isroaibeta", "https://api.isro.gov.in/v1"),
        ("cnsaibeta", "https://api.cnsa.gov.cn/v1"),
        ("roscosmosaibeta", "https://api.roscosmos.ru/v1"),
        ("jaxaaibeta", "https://api.jaxa.jp/v1"),
        ("cnesaibeta", "https://api.cnes.fr/v1"),
        ("dlraibeta", "https://api.dlr.de/v1"),
        ("tencent", "https://api.qcloud.com/v2/index.php"),
        ("ibm", "https://api.us-south.assistant.watson.cloud.ibm.com/instances"),
        ("google", "https://dialogflow.googleapis.com/v2"),
    ])
});

/// 根据提供商取基础 URL
///
/// 未知提供商时把 provider 字符串原样当作 URL，便于临时接入自建端点。
pub fn base_url(provider: &str) -> &str {
    PROVIDER_URLS
        .get(provider)
        .copied()
        .unwrap_or(provider)
}

/// base URL 末段是否已携带版本号 (v1 / v2 / v1beta ...)
fn has_version_segment(base: &str) -> bool {
    let last = base.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    let mut chars = last.chars();
    match chars.next() {
        Some('v') => {
            let rest = chars.as_str();
            !rest.is_empty()
                && rest
                    .chars()
                    .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase() || c == '.')
                && rest.starts_with(|c: char| c.is_ascii_digit())
        }
        _ => false,
    }
}

/// 拼接上游目标 URL
///
/// 基础 URL 已带版本段时剥掉路径上多余的 `v1/` 前缀，保证拼接结果不会
/// 出现重复的版本段或 `//`。ext_path 追加在末尾 (Anthropic 风格路由)。
pub fn join_target(base: &str, path: &str, ext_path: Option<&str>) -> String {
    let base = base.trim_end_matches('/');
    let mut path = path.trim_start_matches('/');
    if has_version_segment(base) {
        path = path.strip_prefix("v1/").unwrap_or(path);
        if path == "v1" {
            path = "";
        }
    }

    let mut target = if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    };

    if let Some(ext) = ext_path {
        let ext = ext.trim_start_matches('/');
        if !ext.is_empty() {
            target = format!("{}/{}", target.trim_end_matches('/'), ext);
        }
    }

    target
}
