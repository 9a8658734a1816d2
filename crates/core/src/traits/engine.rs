use crate::models::{DataFrame, FunctionName, MlInput, MlModel, MlOutput};
use crate::MlResult;

/// 机器学习执行引擎
///
/// 计算是同步且CPU密集的，调用方负责把它放到专用的阻塞线程池上执行，
/// 避免拖慢请求接纳和分派。引擎错误由调用方包装后返回，不会被吞掉。
pub trait MlEngine: Send + Sync {
    /// 训练并返回模型，模型ID由调用方持久化时确定
    fn train(&self, input: &MlInput, data: &DataFrame) -> MlResult<MlModel>;

    /// 使用已有模型预测；远程推理模型没有本地数据
    fn predict(
        &self,
        input: &MlInput,
        data: Option<&DataFrame>,
        model: &MlModel,
    ) -> MlResult<MlOutput>;

    /// 训练后直接在同一数据上预测，不保存模型
    fn train_and_predict(&self, input: &MlInput, data: &DataFrame) -> MlResult<MlOutput>;

    fn execute(
        &self,
        function_name: FunctionName,
        input: &serde_json::Value,
    ) -> MlResult<serde_json::Value>;
}
